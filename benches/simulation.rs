//! Tick cost benchmarks for the arena simulation
//!
//! Run with: cargo bench --bench simulation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use arena_siege_server::game::constants::physics::{WORLD_HEIGHT, WORLD_WIDTH};
use arena_siege_server::game::simulation::Simulation;
use arena_siege_server::game::state::{EntityKind, Team};
use arena_siege_server::game::systems::ai::AiManager;
use arena_siege_server::game::systems::collision;
use arena_siege_server::lobby::{Room, RoomSettings};
use arena_siege_server::net::protocol::PlayerInput;
use arena_siege_server::util::vec2::Vec2;

const ADVERSARY_KINDS: [EntityKind; 4] = [
    EntityKind::Drone,
    EntityKind::Guard,
    EntityKind::Tank,
    EntityKind::Tower,
];

/// A world with four firing players and `count` AI-driven adversaries
fn crowded_world(count: usize) -> (Simulation, AiManager) {
    let mut sim = Simulation::new(42);
    let mut ai = AiManager::new();
    let mut rng = StdRng::seed_from_u64(7);

    for i in 0..4u128 {
        let player_id = Uuid::from_u128(i + 1);
        sim.add_player(player_id);
        sim.set_input(
            player_id,
            PlayerInput {
                fire: true,
                left: i % 2 == 0,
                right: i % 2 == 1,
                aim: -std::f32::consts::FRAC_PI_2,
                ..Default::default()
            },
        );
    }

    for i in 0..count {
        let position = Vec2::new(
            rng.gen_range(100.0..WORLD_WIDTH - 100.0),
            rng.gen_range(100.0..WORLD_HEIGHT * 0.6),
        );
        let kind = ADVERSARY_KINDS[i % ADVERSARY_KINDS.len()];
        let id = sim.spawn(kind, Team::Adversary, position);
        ai.register(&mut sim, id, position);
    }

    (sim, ai)
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.sample_size(50);

    for count in [25, 100, 250, 500] {
        let (mut sim, mut ai) = crowded_world(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("sim_and_ai", count), &count, |b, _| {
            b.iter(|| {
                sim.update();
                ai.update(&mut sim);
                black_box(sim.entity_count());
            })
        });
    }

    group.finish();
}

fn bench_collision(c: &mut Criterion) {
    let mut group = c.benchmark_group("collision");
    group.sample_size(50);

    for count in [100, 500] {
        let (mut sim, mut ai) = crowded_world(count);
        // let volleys get airborne
        for _ in 0..20 {
            sim.update();
            ai.update(&mut sim);
        }

        group.bench_with_input(BenchmarkId::new("resolve", count), &count, |b, _| {
            b.iter(|| black_box(collision::resolve(&mut sim)))
        });
    }

    group.finish();
}

fn bench_room_step(c: &mut Criterion) {
    let mut room = Room::new(
        "bench",
        RoomSettings {
            seed: 99,
            ..Default::default()
        },
    );
    for name in ["a", "b", "c", "d"] {
        let _ = room.add_player(name, None);
    }

    c.bench_function("room_step", |b| {
        b.iter(|| black_box(room.step()))
    });
}

criterion_group!(benches, bench_tick, bench_collision, bench_room_step);
criterion_main!(benches);
