//! Benchmarks for the CS-CFR engine.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cfr_engine::cfr::{Engine, EngineConfig};
use cfr_engine::games::kuhn::KuhnGame;

fn kuhn_iteration_benchmark(c: &mut Criterion) {
    let game = KuhnGame::new(Some(42));
    let mut engine = Engine::new(game).unwrap();
    engine.set_config(EngineConfig::single_threaded());

    c.bench_function("kuhn_single_iteration", |b| {
        b.iter(|| {
            engine.run_iteration().unwrap();
            black_box(engine.utility_manager().iterations())
        })
    });
}

fn kuhn_locked_iteration_benchmark(c: &mut Criterion) {
    let game = KuhnGame::new(Some(42));
    let mut engine = Engine::new(game).unwrap();
    engine.set_config(EngineConfig::default()); // per-node locking on

    c.bench_function("kuhn_single_iteration_locked", |b| {
        b.iter(|| {
            engine.run_iteration().unwrap();
            black_box(engine.utility_manager().iterations())
        })
    });
}

fn kuhn_1000_iterations_benchmark(c: &mut Criterion) {
    c.bench_function("kuhn_1000_iterations", |b| {
        b.iter(|| {
            let game = KuhnGame::new(Some(42));
            let mut engine = Engine::new(game).unwrap();
            engine.set_config(EngineConfig::single_threaded());
            engine.train(black_box(1000)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    kuhn_iteration_benchmark,
    kuhn_locked_iteration_benchmark,
    kuhn_1000_iterations_benchmark
);
criterion_main!(benches);
