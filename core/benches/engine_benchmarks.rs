//! Engine Performance Benchmarks
//!
//! - Reading reconciliation on a hot spot (pure in-memory, target < 1μs)
//! - Lazy spot creation across many keys
//! - Reserve + cancel round trip with an instant payment double
//!
//! Run with: `cargo bench -p spotwatch-core`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use chrono::Duration;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use spotwatch_core::environment::Clock;
use spotwatch_testing::helpers::reading;
use spotwatch_testing::TestHarness;

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    group.throughput(Throughput::Elements(1));

    let harness = TestHarness::new();
    let base = harness.clock.now();
    let mut tick = 0_i64;
    group.bench_function("hot_spot_fresh_reading", |b| {
        b.iter(|| {
            tick += 1;
            let occupied = tick % 2 == 0;
            black_box(harness.engine.ingest(reading("P1", occupied, base + Duration::seconds(tick))));
        });
    });

    group.bench_function("stale_reading", |b| {
        b.iter(|| black_box(harness.engine.ingest(reading("P1", true, base))));
    });

    let mut key = 0_u64;
    group.bench_function("lazy_spot_creation", |b| {
        b.iter(|| {
            key += 1;
            black_box(harness.engine.ingest(reading(&format!("S{key}"), false, base)));
        });
    });
    group.finish();
}

fn bench_reservation_round_trip(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let harness = TestHarness::new();
    harness.provision(&["P1"]);

    c.bench_function("reserve_then_cancel", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let grant = harness
                    .engine
                    .reserve(harness.request("P1", 1.0))
                    .await
                    .expect("spot is free");
                harness
                    .engine
                    .cancel(grant.reservation.id)
                    .await
                    .expect("reservation is active");
            });
        });
    });
}

criterion_group!(benches, bench_reconcile, bench_reservation_round_trip);
criterion_main!(benches);
