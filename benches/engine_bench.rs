use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ipscore::ScoreEngine;
use rand::prelude::*;

fn bench_sequential_increment(c: &mut Criterion) {
    c.bench_function("increment sequential addresses", |b| {
        let engine = ScoreEngine::new();
        let mut ip = 0u32;
        b.iter(|| {
            engine.increment(ip, 1);
            ip = ip.wrapping_add(1);
        });
    });
}

fn bench_random_get(c: &mut Criterion) {
    let engine = ScoreEngine::new();
    let mut rng = StdRng::seed_from_u64(42);
    let addresses: Vec<u32> = (0..100_000).map(|_| rng.random()).collect();
    for &ip in &addresses {
        engine.set(ip, 1);
    }

    let mut group = c.benchmark_group("get");
    group.bench_with_input(BenchmarkId::new("populated", addresses.len()), &addresses, |b, addrs| {
        let mut i = 0usize;
        b.iter(|| {
            let ip = addrs[i % addrs.len()];
            i += 1;
            engine.get(ip)
        });
    });
    group.finish();
}

fn bench_decay_sweep(c: &mut Criterion) {
    let engine = ScoreEngine::new();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50_000 {
        let ip: u32 = rng.random();
        engine.set(ip, rng.random_range(-30_000..30_000));
    }
    c.bench_function("decay sweep over 50k entries", |b| {
        b.iter(|| engine.decay(0.9, 1));
    });
}

criterion_group!(benches, bench_sequential_increment, bench_random_get, bench_decay_sweep);
criterion_main!(benches);
