//! Dispatch core benchmarks.
//!
//! Measures the producer posting path and consumer drain throughput.
//!
//! Run with: cargo bench --bench dispatch_bench

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use lattice_alerts::{category, AlertHub, AlertKind, HubConfig};

struct Tick {
    sequence: u64,
}

impl AlertKind for Tick {
    const TAG: u16 = 1;
    const CATEGORY: u32 = category::STATS;
    const NAME: &'static str = "tick";
}

struct Note {
    text: lattice_alerts::ArenaStr,
}

impl AlertKind for Note {
    const TAG: u16 = 2;
    const CATEGORY: u32 = category::CONNECT;
    const NAME: &'static str = "note";
}

fn bench_post_drain_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("post_pooled", |b| {
        let mut config = HubConfig::with_queue_limit(1 << 12);
        config.category_mask = category::ALL;
        let (hub, mut consumer) = AlertHub::new(config).unwrap();
        let mut sequence = 0u64;
        b.iter(|| {
            sequence += 1;
            if !hub.post(|_| Tick { sequence }) {
                let _ = consumer.drain();
            }
            black_box(sequence)
        });
    });

    group.bench_function("post_with_arena_text", |b| {
        let mut config = HubConfig::with_queue_limit(1 << 12);
        config.category_mask = category::ALL;
        let (hub, mut consumer) = AlertHub::new(config).unwrap();
        b.iter(|| {
            if !hub.post(|arena| Note {
                text: arena.stash_str("listen socket rebound"),
            }) {
                let _ = consumer.drain();
            }
        });
    });

    group.bench_function("drain_1024", |b| {
        let mut config = HubConfig::with_queue_limit(1 << 12);
        config.category_mask = category::ALL;
        let (hub, mut consumer) = AlertHub::new(config).unwrap();
        b.iter(|| {
            for sequence in 0..1024 {
                hub.post(|_| Tick { sequence });
            }
            let batch = consumer.drain();
            black_box(batch.len())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_post_drain_cycle);
criterion_main!(benches);
