//! Throughput benchmarks for creation, iteration, and migration.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use skara_ecs::prelude::*;

#[derive(Debug, Default, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}
impl Component for Position {}

#[derive(Debug, Default, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}
impl Component for Velocity {}

fn populated(count: u32) -> EntityRegistry {
    let mut registry = EntityRegistry::new();
    let first = registry.create::<(Position, Velocity)>(count);
    for i in 0..count {
        let e = Entity::new(first.index() + i, first.generation());
        registry.get_mut::<Velocity>(e).x = i as f32;
    }
    registry
}

fn bench_create(c: &mut Criterion) {
    c.bench_function("create_10k_batch", |b| {
        b.iter(|| {
            let mut registry = EntityRegistry::new();
            black_box(registry.create::<(Position, Velocity)>(10_000));
            registry
        })
    });

    c.bench_function("create_10k_single", |b| {
        b.iter(|| {
            let mut registry = EntityRegistry::new();
            for _ in 0..10_000 {
                black_box(registry.create::<(Position, Velocity)>(1));
            }
            registry
        })
    });
}

fn bench_iterate(c: &mut Criterion) {
    let mut registry = populated(10_000);

    c.bench_function("iterate_10k_chunks", |b| {
        b.iter(|| {
            let mut sum = 0.0f32;
            registry
                .range::<(&Position, &Velocity)>()
                .for_each_chunk(|_, (positions, velocities)| {
                    for (p, v) in positions.iter().zip(velocities.iter()) {
                        sum += p.x + v.x;
                    }
                });
            black_box(sum)
        })
    });

    c.bench_function("integrate_10k", |b| {
        b.iter(|| {
            registry
                .range_mut::<(&mut Position, &Velocity)>()
                .for_each_chunk(|_, (positions, velocities)| {
                    for (p, v) in positions.iter_mut().zip(velocities.iter()) {
                        p.x += v.x * 0.016;
                    }
                });
        })
    });
}

fn bench_migrate(c: &mut Criterion) {
    c.bench_function("migrate_1k_add_remove", |b| {
        let mut registry = EntityRegistry::new();
        let first = registry.create::<(Position,)>(1_000);
        let entities: Vec<Entity> = (0..1_000)
            .map(|i| Entity::new(first.index() + i, first.generation()))
            .collect();

        b.iter(|| {
            for &e in &entities {
                registry.add(e, Velocity::default());
            }
            for &e in &entities {
                registry.remove::<Velocity>(e);
            }
        })
    });
}

criterion_group!(benches, bench_create, bench_iterate, bench_migrate);
criterion_main!(benches);
