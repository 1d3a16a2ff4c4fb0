//! Benchmarks for the feeder side
//!
//! - Full begin/submit cycle under the region lock, with readiness signal
//! - Lock-free render cache key probe used by every consumer poll
//!
//! Platform: Cross-platform (temporary region directory)

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use overlay_shm::test_utils::{TestFeeder, sample_overlays};
use overlay_shm::{ConsumerKind, ShmConfig};
use std::hint::black_box;

fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_frame");
    for overlays in [0usize, 4, 16] {
        let feeder = TestFeeder::new("bench.submit", 1);
        let configs = sample_overlays(overlays);
        group.bench_with_input(BenchmarkId::from_parameter(overlays), &configs, |b, configs| {
            b.iter(|| feeder.publish(black_box(&ShmConfig::default()), black_box(configs)))
        });
    }
    group.finish();
}

fn bench_cache_key_probe(c: &mut Criterion) {
    let feeder = TestFeeder::new("bench.probe", 1);
    feeder.publish(&ShmConfig::default(), &sample_overlays(1));
    let reader = feeder.reader();

    c.bench_function("render_cache_key", |b| {
        b.iter(|| black_box(reader.render_cache_key(black_box(ConsumerKind::SteamVr))))
    });
}

criterion_group!(benches, bench_submit, bench_cache_key_probe);
criterion_main!(benches);
