//! Benchmarks for pipeline construction and scheduling.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dockhand::artifacts::ArtifactStore;
use dockhand::cancellation::CancellationToken;
use dockhand::config::RunnerConfig;
use dockhand::executor::StageExecutor;
use dockhand::pipeline::{Pipeline, PipelineBuilder, PipelineRunner, StageSpec};
use dockhand::secrets::SecretStore;
use dockhand::testing::MockRuntime;
use std::sync::Arc;

/// `width` independent stages fanning into one final stage.
fn wide(width: usize) -> Pipeline {
    let mut builder = PipelineBuilder::new("wide");
    for i in 0..width {
        builder
            .add_stage(StageSpec::new(format!("s{i}"), "alpine").with_command("true"))
            .unwrap();
    }
    builder
        .add_stage(StageSpec::new("join", "alpine").with_dependencies((0..width).map(|i| format!("s{i}"))))
        .unwrap();
    builder.build().unwrap()
}

/// A chain of `depth` stages, added in reverse order.
fn deep(depth: usize) -> Pipeline {
    let mut builder = PipelineBuilder::new("deep");
    for i in (0..depth).rev() {
        let mut spec = StageSpec::new(format!("s{i}"), "alpine").with_command("true");
        if i > 0 {
            spec = spec.with_dependency(format!("s{}", i - 1));
        }
        builder.add_stage(spec).unwrap();
    }
    builder.build().unwrap()
}

fn build_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("wide", size), &size, |b, &n| b.iter(|| black_box(wide(n))));
        group.bench_with_input(BenchmarkId::new("deep", size), &size, |b, &n| b.iter(|| black_box(deep(n))));
    }
    group.finish();
}

fn levels_benchmark(c: &mut Criterion) {
    let pipeline = deep(500);
    c.bench_function("levels/deep_500", |b| b.iter(|| black_box(pipeline.levels())));
}

fn run_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
    let root = tempfile::tempdir().unwrap();
    let executor = Arc::new(StageExecutor::new(
        Arc::new(MockRuntime::new()),
        Arc::new(ArtifactStore::new(root.path())),
    ));
    let runner = PipelineRunner::new(executor, RunnerConfig::default().with_max_parallel(8));
    let secrets = SecretStore::new();

    let mut group = c.benchmark_group("run");
    for (label, pipeline) in [("wide_100", wide(100)), ("deep_100", deep(100))] {
        group.bench_function(label, |b| {
            b.iter(|| rt.block_on(runner.run(&pipeline, &secrets, &CancellationToken::new())));
        });
    }
    group.finish();
}

criterion_group!(benches, build_benchmark, levels_benchmark, run_benchmark);
criterion_main!(benches);
