use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use tick_pipeline::{DataItem, MapTransform, PipelineBuilder, PredicateFilter, SequenceGenerator};

fn benchmark_default_stages(c: &mut Criterion) {
    c.bench_function("lockstep_default_stages_1000_ticks", |b| {
        b.iter(|| {
            let report = PipelineBuilder::new()
                .ticks(black_box(1000))
                .generator_pause(Duration::ZERO)
                .progress_interval(0)
                .without_log()
                .build()
                .expect("Build failed")
                .run()
                .expect("Run failed");
            black_box(report.stats.items_filtered)
        });
    });
}

fn benchmark_trivial_stages(c: &mut Criterion) {
    c.bench_function("lockstep_trivial_stages_1000_ticks", |b| {
        b.iter(|| {
            let report = PipelineBuilder::new()
                .ticks(black_box(1000))
                .capacity(4)
                .generator_pause(Duration::ZERO)
                .progress_interval(0)
                .without_log()
                .generator(SequenceGenerator::starting_at(1))
                .processor(MapTransform::new("double", |item: &DataItem| {
                    item.raw_value() as f64 * 2.0
                }))
                .filter(PredicateFilter::new("even", |item: &DataItem| {
                    item.raw_value() % 2 == 0
                }))
                .build()
                .expect("Build failed")
                .run()
                .expect("Run failed");
            black_box(report.stats.items_filtered)
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(20);
    targets = benchmark_default_stages, benchmark_trivial_stages
);
criterion_main!(benches);
