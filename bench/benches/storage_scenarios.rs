//! Storage scenario benchmarks using Criterion.
//!
//! These benchmarks measure realistic workloads:
//! - Particle system (high entity count, destruction during iteration, id recycling)

use bappa_bench::scenarios::{ParticleConfig, ParticleScenario, Scenario};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

fn bench_particles(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenario/particles");

    for count in [10_000, 50_000, 100_000] {
        group.throughput(Throughput::Elements(count as u64));

        // Full frame update
        group.bench_with_input(BenchmarkId::new("frame", count), &count, |b, &n| {
            let mut scenario = ParticleScenario::with_config(ParticleConfig {
                particle_count: n,
                ..Default::default()
            });
            scenario.setup().unwrap();

            b.iter(|| {
                scenario.update().unwrap();
            });

            scenario.teardown().unwrap();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_particles);
criterion_main!(benches);
