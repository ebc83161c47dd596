//! System registration and dependency-graph scheduling.
//!
//! A *system* is a named per-frame update callback. Systems never order
//! themselves against each other directly; they order against named
//! *barriers*. Every system's own name doubles as an implicit barrier, so
//! "after system X" is just `.after("x")`, and any number of systems can
//! join a shared phase with `.as_barrier("update")`. One declaration per
//! system replaces the pairwise edges it stands for; the builder expands
//! barrier groups into concrete edges at [`SystemGraphBuilder::build`] time.
//!
//! `build` fails with a recoverable [`ScheduleError::UndeclaredBarrier`]
//! when a referenced barrier was never declared by any system. Cycle
//! detection and linearization are delegated to `skara-graph`; a cycle is a
//! startup error, never silently dropped.

use std::collections::HashMap;

use tracing::{debug, trace};

use skara_graph::{Graph, GraphError, NodeId};

use crate::deferred::DeferredBuffer;
use crate::registry::EntityRegistry;

/// Errors from graph construction and linearization.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// A `before`/`after` constraint referenced a barrier no system
    /// declared.
    #[error("barrier '{0}' was referenced but never declared")]
    UndeclaredBarrier(String),

    /// The declared constraints contradict each other.
    #[error("system ordering constraints form a cycle involving '{0}'")]
    Cycle(String),
}

// ---------------------------------------------------------------------------
// Systems and their context
// ---------------------------------------------------------------------------

/// What a scheduled system's callback receives each frame. The registry and
/// the deferred buffer are owned by the surrounding runtime; structural
/// changes decided during the frame go through `deferred` and are applied
/// when the frame's systems have all run.
pub struct UpdateContext<'a> {
    pub registry: &'a mut EntityRegistry,
    pub deferred: &'a mut DeferredBuffer,
    pub dt: f64,
}

type SystemFn = Box<dyn FnMut(&mut UpdateContext<'_>)>;

/// A named update callback.
pub struct SystemDescriptor {
    name: &'static str,
    update: SystemFn,
}

impl SystemDescriptor {
    pub fn new(name: &'static str, update: impl FnMut(&mut UpdateContext<'_>) + 'static) -> Self {
        Self {
            name,
            update: Box::new(update),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for SystemDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDescriptor")
            .field("name", &self.name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SystemGraphBuilder
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BarrierSystems {
    members: Vec<NodeId>,
    after: Vec<&'static str>,
    before: Vec<&'static str>,
}

/// Collects system declarations and barrier constraints; see the module
/// docs.
#[derive(Default)]
pub struct SystemGraphBuilder {
    graph: Graph<SystemDescriptor>,
    barriers: HashMap<&'static str, BarrierSystems>,
}

impl SystemGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a system vertex and its implicit identity barrier; the
    /// returned builder chains ordering constraints for this system.
    pub fn add_system(&mut self, descriptor: SystemDescriptor) -> BarrierBuilder<'_> {
        let name = descriptor.name;
        debug_assert!(
            self.graph.node_ids().all(|id| self.graph.node(id).name != name),
            "duplicate system name '{name}'"
        );
        let system = self.graph.add_node(descriptor);
        self.barriers.entry(name).or_default().members.push(system);
        BarrierBuilder {
            builder: self,
            system,
            name,
        }
    }

    /// Expands every barrier constraint into concrete edges. Fails when a
    /// constraint references a barrier no system declared.
    pub fn build(self) -> Result<SystemGraph, ScheduleError> {
        let Self {
            mut graph,
            barriers,
        } = self;

        for (name, barrier) in &barriers {
            for &after_name in &barrier.after {
                let other = barriers
                    .get(after_name)
                    .ok_or_else(|| ScheduleError::UndeclaredBarrier(after_name.to_string()))?;
                for &member in &barrier.members {
                    for &dependency in &other.members {
                        graph.add_edge(dependency, member);
                    }
                }
            }
            for &before_name in &barrier.before {
                let other = barriers
                    .get(before_name)
                    .ok_or_else(|| ScheduleError::UndeclaredBarrier(before_name.to_string()))?;
                for &member in &barrier.members {
                    for &dependent in &other.members {
                        graph.add_edge(member, dependent);
                    }
                }
            }
            trace!(barrier = name, members = barrier.members.len(), "expanded barrier group");
        }

        debug!(
            systems = graph.node_count(),
            edges = graph.edge_count(),
            "built system graph"
        );
        Ok(SystemGraph { graph, order: None })
    }
}

/// Chains ordering constraints for one just-added system.
pub struct BarrierBuilder<'b> {
    builder: &'b mut SystemGraphBuilder,
    system: NodeId,
    name: &'static str,
}

impl BarrierBuilder<'_> {
    /// This system runs after every member of `barrier`.
    pub fn after(self, barrier: &'static str) -> Self {
        self.builder
            .barriers
            .entry(self.name)
            .or_default()
            .after
            .push(barrier);
        self
    }

    /// This system runs before every member of `barrier`.
    pub fn before(self, barrier: &'static str) -> Self {
        self.builder
            .barriers
            .entry(self.name)
            .or_default()
            .before
            .push(barrier);
        self
    }

    /// Joins this system to an additional named barrier group.
    pub fn as_barrier(self, barrier: &'static str) -> Self {
        self.builder
            .barriers
            .entry(barrier)
            .or_default()
            .members
            .push(self.system);
        self
    }
}

// ---------------------------------------------------------------------------
// SystemGraph
// ---------------------------------------------------------------------------

/// The wired dependency graph. Linearization happens once and is cached;
/// the order is consumed each frame by [`SystemGraph::run_frame`] or by an
/// external executor via [`SystemGraph::execution_order`].
pub struct SystemGraph {
    graph: Graph<SystemDescriptor>,
    order: Option<Vec<NodeId>>,
}

impl SystemGraph {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn system_name(&self, id: NodeId) -> &'static str {
        self.graph.node(id).name
    }

    /// A linear order honoring every declared constraint.
    pub fn execution_order(&mut self) -> Result<&[NodeId], ScheduleError> {
        if self.order.is_none() {
            let order = self.graph.topological_order().map_err(|err| match err {
                GraphError::Cycle(node) => {
                    ScheduleError::Cycle(self.graph.node(node).name.to_string())
                }
            })?;
            self.order = Some(order);
        }
        Ok(self
            .order
            .as_deref()
            .unwrap_or_else(|| unreachable!("order cached above")))
    }

    /// Runs every system once in execution order, then applies the
    /// context's deferred buffer.
    pub fn run_frame(&mut self, ctx: &mut UpdateContext<'_>) -> Result<(), ScheduleError> {
        let order = self.execution_order()?.to_vec();
        for id in order {
            trace!(system = self.graph.node(id).name, "running system");
            (self.graph.node_mut(id).update)(ctx);
        }
        ctx.deferred.apply(&mut *ctx.registry);
        Ok(())
    }
}

impl std::fmt::Debug for SystemGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemGraph")
            .field("systems", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::type_registry::Component;

    fn noop(name: &'static str) -> SystemDescriptor {
        SystemDescriptor::new(name, |_| {})
    }

    fn logged(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> SystemDescriptor {
        let log = Rc::clone(log);
        SystemDescriptor::new(name, move |_| log.borrow_mut().push(name))
    }

    fn order_of(graph: &mut SystemGraph) -> Vec<&'static str> {
        graph
            .execution_order()
            .unwrap()
            .to_vec()
            .into_iter()
            .map(|id| graph.system_name(id))
            .collect()
    }

    fn must_precede(order: &[&str], first: &str, second: &str) {
        let a = order.iter().position(|&n| n == first).unwrap();
        let b = order.iter().position(|&n| n == second).unwrap();
        assert!(a < b, "expected {first} before {second} in {order:?}");
    }

    #[test]
    fn after_a_system_name_orders_directly() {
        let mut builder = SystemGraphBuilder::new();
        builder.add_system(noop("movement")).after("physics");
        builder.add_system(noop("physics"));

        let mut graph = builder.build().unwrap();
        let order = order_of(&mut graph);
        must_precede(&order, "physics", "movement");
    }

    #[test]
    fn barrier_member_precedes_its_dependents() {
        let mut builder = SystemGraphBuilder::new();
        builder.add_system(noop("a")).as_barrier("phase1");
        builder.add_system(noop("b")).after("phase1");
        builder.add_system(noop("c")).after("phase1");

        let mut graph = builder.build().unwrap();
        let order = order_of(&mut graph);
        must_precede(&order, "a", "b");
        must_precede(&order, "a", "c");
    }

    #[test]
    fn before_constraint_inverts_the_edge() {
        let mut builder = SystemGraphBuilder::new();
        builder.add_system(noop("render"));
        builder.add_system(noop("extraction")).before("render");

        let mut graph = builder.build().unwrap();
        let order = order_of(&mut graph);
        must_precede(&order, "extraction", "render");
    }

    #[test]
    fn shared_barrier_fans_in_and_out() {
        let mut builder = SystemGraphBuilder::new();
        builder.add_system(noop("input"));
        builder.add_system(noop("ai")).as_barrier("update").after("input");
        builder.add_system(noop("physics")).as_barrier("update").after("input");
        builder.add_system(noop("render")).after("update");

        let mut graph = builder.build().unwrap();
        let order = order_of(&mut graph);
        for system in ["ai", "physics"] {
            must_precede(&order, "input", system);
            must_precede(&order, system, "render");
        }
    }

    #[test]
    fn undeclared_barrier_is_a_recoverable_error() {
        let mut builder = SystemGraphBuilder::new();
        builder.add_system(noop("movement")).after("missing-phase");

        match builder.build() {
            Err(ScheduleError::UndeclaredBarrier(name)) => assert_eq!(name, "missing-phase"),
            other => panic!("expected undeclared-barrier error, got {other:?}"),
        }
    }

    #[test]
    fn contradictory_constraints_fail_linearization() {
        let mut builder = SystemGraphBuilder::new();
        builder.add_system(noop("x")).after("y");
        builder.add_system(noop("y")).after("x");

        let mut graph = builder.build().unwrap();
        assert!(matches!(
            graph.execution_order(),
            Err(ScheduleError::Cycle(_))
        ));
    }

    #[test]
    fn run_frame_respects_order_and_applies_deferred() {
        #[derive(Debug, Default, Clone, Copy, PartialEq)]
        struct Spawned;
        impl Component for Spawned {}

        let log = Rc::new(RefCell::new(Vec::new()));

        let mut builder = SystemGraphBuilder::new();
        builder.add_system(logged("late", &log)).after("early");
        builder.add_system(logged("early", &log));
        builder.add_system(SystemDescriptor::new("spawner", |ctx| {
            ctx.deferred.create::<(Spawned,)>(2);
        }));

        let mut graph = builder.build().unwrap();
        let mut registry = EntityRegistry::new();
        let mut deferred = DeferredBuffer::new();
        let mut ctx = UpdateContext {
            registry: &mut registry,
            deferred: &mut deferred,
            dt: 1.0 / 60.0,
        };
        graph.run_frame(&mut ctx).unwrap();

        assert_eq!(*log.borrow(), vec!["early", "late"]);
        // The deferred spawn landed after the frame.
        assert_eq!(registry.entity_count(), 2);
        assert!(deferred.is_empty());
    }
}
