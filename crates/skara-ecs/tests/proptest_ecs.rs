//! Property tests for registry operations.
//!
//! Random sequences of structural operations are generated with `proptest`
//! and the registry's bookkeeping invariants are checked after each
//! sequence: liveness matches the model, stored values survive migrations
//! and swap-removes, and drop glue stays balanced.

use std::cell::Cell;
use std::collections::HashMap;

use proptest::prelude::*;
use skara_ecs::prelude::*;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}
impl Component for Pos {}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Vel {
    dx: f32,
    dy: f32,
}
impl Component for Vel {}

struct Marked;
impl Tag for Marked {}

thread_local! {
    static PAYLOAD_LIVE: Cell<i64> = const { Cell::new(0) };
}

/// A component with drop glue, to catch double-frees and leaks.
struct Payload(#[allow(dead_code)] String);
impl Default for Payload {
    fn default() -> Self {
        PAYLOAD_LIVE.with(|c| c.set(c.get() + 1));
        Payload(String::from("payload"))
    }
}
impl Drop for Payload {
    fn drop(&mut self) {
        PAYLOAD_LIVE.with(|c| c.set(c.get() - 1));
    }
}
impl Component for Payload {}

/// Operations we can perform on the registry.
#[derive(Debug, Clone)]
enum EcsOp {
    Spawn(f32, f32),
    SpawnBatch(u8),
    Despawn(usize),
    InsertVel(usize, f32, f32),
    RemoveVel(usize),
    AddPayload(usize),
    ToggleTag(usize),
    CountMoving,
}

fn finite_f32() -> impl Strategy<Value = f32> {
    (-1_000_000i32..1_000_000i32).prop_map(|v| v as f32 * 0.01)
}

fn ecs_op_strategy() -> impl Strategy<Value = EcsOp> {
    prop_oneof![
        (finite_f32(), finite_f32()).prop_map(|(x, y)| EcsOp::Spawn(x, y)),
        (1..20u8).prop_map(EcsOp::SpawnBatch),
        (0..100usize).prop_map(EcsOp::Despawn),
        (0..100usize, finite_f32(), finite_f32())
            .prop_map(|(i, dx, dy)| EcsOp::InsertVel(i, dx, dy)),
        (0..100usize).prop_map(EcsOp::RemoveVel),
        (0..100usize).prop_map(EcsOp::AddPayload),
        (0..100usize).prop_map(EcsOp::ToggleTag),
        Just(EcsOp::CountMoving),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn random_ops_preserve_invariants(ops in prop::collection::vec(ecs_op_strategy(), 1..60)) {
        PAYLOAD_LIVE.with(|c| c.set(0));
        {
            let mut registry = EntityRegistry::new();
            // A model of what should be alive and which Pos value each
            // entity carries.
            let mut alive: Vec<Entity> = Vec::new();
            let mut expected: HashMap<Entity, Pos> = HashMap::new();

            for op in ops {
                match op {
                    EcsOp::Spawn(x, y) => {
                        let e = registry.create::<(Pos,)>(1);
                        prop_assert!(e.is_valid());
                        *registry.get_mut::<Pos>(e) = Pos { x, y };
                        expected.insert(e, Pos { x, y });
                        alive.push(e);
                    }
                    EcsOp::SpawnBatch(count) => {
                        let first = registry.create::<(Pos, Vel)>(count as u32);
                        prop_assert!(first.is_valid());
                        for i in 0..count as u32 {
                            let e = Entity::new(first.index() + i, first.generation());
                            expected.insert(e, Pos::default());
                            alive.push(e);
                        }
                    }
                    EcsOp::Despawn(idx) => {
                        if !alive.is_empty() {
                            let e = alive.remove(idx % alive.len());
                            prop_assert!(registry.destroy(e));
                            prop_assert!(!registry.destroy(e));
                            expected.remove(&e);
                        }
                    }
                    EcsOp::InsertVel(idx, dx, dy) => {
                        if !alive.is_empty() {
                            let e = alive[idx % alive.len()];
                            let added = registry.add(e, Vel { dx, dy });
                            prop_assert!(added);
                            prop_assert_eq!(registry.get::<Vel>(e), &Vel { dx, dy });
                        }
                    }
                    EcsOp::RemoveVel(idx) => {
                        if !alive.is_empty() {
                            let e = alive[idx % alive.len()];
                            let had = registry.has_component::<Vel>(e);
                            prop_assert_eq!(registry.remove::<Vel>(e), had);
                        }
                    }
                    EcsOp::AddPayload(idx) => {
                        if !alive.is_empty() {
                            let e = alive[idx % alive.len()];
                            registry.add(e, Payload::default());
                        }
                    }
                    EcsOp::ToggleTag(idx) => {
                        if !alive.is_empty() {
                            let e = alive[idx % alive.len()];
                            if registry.has_tag::<Marked>(e) {
                                prop_assert!(registry.remove_tag::<Marked>(e));
                            } else {
                                prop_assert!(registry.add_tag::<Marked>(e));
                            }
                        }
                    }
                    EcsOp::CountMoving => {
                        let counted = registry.range::<(&Pos, &Vel)>().count();
                        let modeled = alive
                            .iter()
                            .filter(|&&e| registry.has_component::<Vel>(e))
                            .count();
                        prop_assert_eq!(counted, modeled);
                    }
                }

                // Core invariant: the registry agrees with the model after
                // every operation.
                prop_assert_eq!(registry.entity_count(), alive.len());
                for &e in &alive {
                    prop_assert!(registry.contains(e));
                }
            }

            // Values survived every migration and swap-remove.
            for (&e, pos) in &expected {
                prop_assert_eq!(registry.get::<Pos>(e), pos);
            }

            // Every entity is reachable through iteration exactly once.
            let mut visited = 0usize;
            registry.range::<(&Pos,)>().for_each(|e, (pos,)| {
                visited += 1;
                if let Some(expected_pos) = expected.get(&e) {
                    assert_eq!(pos, expected_pos);
                }
            });
            prop_assert_eq!(visited, alive.len());
        }
        // Registry dropped: all payload drop glue ran, none twice.
        let live_payloads = PAYLOAD_LIVE.with(|c| c.get());
        prop_assert_eq!(live_payloads, 0);
    }

    #[test]
    fn recycled_handles_never_alias(count in 1..40u32) {
        let mut registry = EntityRegistry::new();
        let mut stale = Vec::new();

        for _ in 0..count {
            let e = registry.create::<(Pos,)>(1);
            registry.destroy(e);
            stale.push(e);
        }
        let live = registry.create::<(Pos,)>(1);

        for old in stale {
            prop_assert!(!registry.contains(old));
        }
        prop_assert!(registry.contains(live));
    }
}
