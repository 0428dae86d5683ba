use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use routecraft_core::builder::Builder;
use routecraft_core::context::Context;
use routecraft_core::route::{EmitFn, Source, SourceCompletion};
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct OneShot(serde_json::Value);

impl Source for OneShot {
    fn subscribe(&self, _context: Arc<Context>, emit: EmitFn, _cancellation: CancellationToken) -> SourceCompletion {
        let body = self.0.clone();
        Box::pin(async move {
            emit(body, None).await;
            Ok(())
        })
    }
}

fn linear_pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("linear pipeline, 5 steps", |b| {
        b.to_async(&runtime).iter(|| async {
            let context = Context::new("bench");
            let definitions = Builder::new()
                .from(OneShot(json!({"value": 1})))
                .transform(|body: &serde_json::Value| {
                    json!({ "value": body["value"].as_i64().unwrap_or(0) + 1 })
                })
                .unwrap()
                .transform(|body: &serde_json::Value| {
                    json!({ "value": body["value"].as_i64().unwrap_or(0) * 2 })
                })
                .unwrap()
                .filter(|_ex: &routecraft_core::exchange::Exchange| Ok(true))
                .unwrap()
                .process(|ex: routecraft_core::exchange::Exchange| {
                    Box::pin(async move { Ok(ex) })
                })
                .unwrap()
                .build();

            context.register_routes(black_box(definitions)).await.unwrap();
            context.start().await.unwrap();
        });
    });
}

fn split_aggregate_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("split/aggregate, arity 10", |b| {
        b.to_async(&runtime).iter(|| async {
            let context = Context::new("bench");
            let definitions = Builder::new()
                .from(OneShot(json!([0, 1, 2, 3, 4, 5, 6, 7, 8, 9])))
                .split(|body: &serde_json::Value| {
                    Ok(body.as_array().cloned().unwrap_or_default())
                })
                .unwrap()
                .aggregate(|exchanges: &[routecraft_core::exchange::Exchange]| {
                    let sum: i64 = exchanges
                        .iter()
                        .filter_map(|e| e.body().as_i64())
                        .sum();
                    Ok(json!(sum))
                })
                .unwrap()
                .build();

            context.register_routes(black_box(definitions)).await.unwrap();
            context.start().await.unwrap();
        });
    });
}

criterion_group!(benches, linear_pipeline_benchmark, split_aggregate_benchmark);
criterion_main!(benches);
