//! Benchmarks for pipeline execution.

use conveyor::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn three_stage(items: u64, scale: usize) -> Dispatcher {
    Conveyor::start(Options::new("bench"))
        .add_source(StageSpec::new("count").with_fn(move |p| {
            if p.sequence() < items {
                Ok(Outcome::value(p.sequence()))
            } else {
                Ok(Outcome::Stop)
            }
        }))
        .and_then(|b| {
            b.add_stage(StageSpec::new("square").with_max_scale(scale).with_fn(|p| {
                let n = p.value().and_then(Payload::as_u64).unwrap_or(0);
                Ok(Outcome::value(n * n))
            }))
        })
        .and_then(|b| b.add_sink(StageSpec::new("drop").with_fn(|_| Ok(Outcome::Skip))))
        .map(|b| b.build())
        .unwrap_or_else(|e| panic!("invalid bench pipeline: {e}"))
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| panic!("runtime: {e}"));

    for scale in [1, 8] {
        let dispatcher = three_stage(1_000, scale);
        c.bench_function(&format!("three_stage_1000_scale_{scale}"), |b| {
            b.iter(|| {
                runtime.block_on(async {
                    let runner = dispatcher.dispatch_background().unwrap_or_else(|e| panic!("{e}"));
                    black_box(runner.wait().await).ok();
                });
            });
        });
    }
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
