//! Benchmarks for the stage runner and progress rendering.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use vodaflow::config::RunnerConfig;
use vodaflow::core::{global_percent, progress_bar};
use vodaflow::events::{truncate_preview, NoOpSink};
use vodaflow::pipeline::StageRunner;
use vodaflow::stages::Stage;
use vodaflow::testing::MockStage;

fn stages(count: usize) -> Vec<Box<dyn Stage>> {
    (0..count)
        .map(|i| {
            Box::new(
                MockStage::new(format!("stage {i}"))
                    .with_step(50.0, "half")
                    .with_step(100.0, "done"),
            ) as Box<dyn Stage>
        })
        .collect()
}

fn runner_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("runner");
    for count in [1, 9, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let runner =
                    StageRunner::new("bench", stages(count), RunnerConfig::immediate()).unwrap();
                rt.block_on(runner.run(Arc::new(NoOpSink)))
            });
        });
    }
    group.finish();
}

fn rendering_benchmark(c: &mut Criterion) {
    c.bench_function("global_percent", |b| {
        b.iter(|| global_percent(black_box(4), black_box(9), black_box(37.5)));
    });
    c.bench_function("progress_bar", |b| {
        b.iter(|| progress_bar(black_box(61.2)));
    });
    let long = "🚀 Stage 3/9: Device API\n".repeat(20);
    c.bench_function("truncate_preview", |b| {
        b.iter(|| truncate_preview(black_box(&long), 200));
    });
}

criterion_group!(benches, runner_benchmark, rendering_benchmark);
criterion_main!(benches);
