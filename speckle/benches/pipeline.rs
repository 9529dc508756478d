//! Full reconstruction benchmarks.
//! Run with: cargo bench -p speckle --bench pipeline

mod support;

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use glam::DVec2;
use speckle::{
    Calibration, Config, Frame, IntegrationConfig, ReferencePattern, Reconstructor, SequentialExecutor, TrackingConfig,
    integrate,
};

fn defocus_scene(size: usize) -> (Vec<Frame>, ReferencePattern) {
    let blobs = support::blobs(size, size, 7);
    let center = DVec2::splat((size as f64 - 1.0) / 2.0);
    let reference = ReferencePattern::new(support::render(size, size, &blobs, |_| DVec2::ZERO));
    let frame = Frame::new(support::render(size, size, &blobs, |p| 0.03 * (p - center)));
    (vec![frame], reference)
}

fn config(worker_count: usize) -> Config {
    Config {
        tracking: TrackingConfig {
            window_size: 16,
            window_stride: 8,
            search_margin: 4,
            min_search_margin: 2,
        },
        worker_count,
        ..Default::default()
    }
}

/// End-to-end reconstruction across image sizes and worker counts.
fn benchmark_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct");
    group.sample_size(10);
    let calibration = Calibration::new(1.0, 1.0);

    for size in [96, 192] {
        let (frames, reference) = defocus_scene(size);
        group.throughput(Throughput::Elements((size * size) as u64));

        let sequential = match Reconstructor::with_executor(config(1), SequentialExecutor) {
            Ok(r) => r,
            Err(e) => panic!("invalid benchmark config: {e}"),
        };
        group.bench_function(BenchmarkId::new("sequential", size), |b| {
            b.iter(|| black_box(sequential.reconstruct(&frames, reference.clone(), &calibration)))
        });

        let pooled = match Reconstructor::new(config(0)) {
            Ok(r) => r,
            Err(e) => panic!("invalid benchmark config: {e}"),
        };
        group.bench_function(BenchmarkId::new("thread_pool", size), |b| {
            b.iter(|| black_box(pooled.reconstruct(&frames, reference.clone(), &calibration)))
        });
    }

    group.finish();
}

/// Integration alone, fed from a single converged reconstruction.
fn benchmark_integrate(c: &mut Criterion) {
    let mut group = c.benchmark_group("integrate");
    let (frames, reference) = defocus_scene(192);
    let reconstructor = match Reconstructor::new(config(0)) {
        Ok(r) => r,
        Err(e) => panic!("invalid benchmark config: {e}"),
    };
    let gradient = match reconstructor.reconstruct(&frames, reference, &Calibration::new(1.0, 1.0)) {
        Ok(result) => result.gradient,
        Err(e) => panic!("reconstruction failed: {e}"),
    };
    let integration = IntegrationConfig::default();

    group.throughput(Throughput::Elements(gradient.valid_count() as u64));
    group.bench_function("cg_192", |b| b.iter(|| black_box(integrate(black_box(&gradient), &integration))));

    group.finish();
}

criterion_group!(benches, benchmark_reconstruct, benchmark_integrate);
criterion_main!(benches);
