//! Aggregation pipeline benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quarry_bench::{sales, stages};
use quarry_codec::Value;
use quarry_core::pipeline::expression::parse_operand;
use quarry_core::pipeline::{ArraySource, ExpressionContext, Pipeline};

const GROUP_BY_ITEM: &str = r#"[
    {"$match": {"qty": {"$gte": 3}}},
    {"$group": {"_id": "$item", "units": {"$sum": "$qty"}, "top": {"$max": "$price"}, "tags": {"$addToSet": "$tags"}}},
    {"$sort": {"units": -1}}
]"#;

const TOP_TEN: &str = r#"[
    {"$project": {"item": 1, "revenue": {"$multiply": ["$qty", "$price"]}}},
    {"$sort": {"revenue": -1}},
    {"$limit": 10}
]"#;

/// Benchmark expression evaluation, before and after optimization.
fn bench_expression(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression");
    let doc = sales(1).remove(0);
    let spec = Value::from_json_str(
        r#"{"$cond": [{"$gt": ["$qty", {"$add": [2, 3]}]}, {"$multiply": ["$qty", "$price"]}, 0]}"#,
    )
    .unwrap();

    let raw = parse_operand(&spec).unwrap();
    group.bench_function("evaluate", |b| {
        b.iter(|| black_box(raw.evaluate(black_box(&doc)).unwrap()));
    });

    let optimized = parse_operand(&spec).unwrap().optimize().unwrap();
    group.bench_function("evaluate_optimized", |b| {
        b.iter(|| black_box(optimized.evaluate(black_box(&doc)).unwrap()));
    });

    group.bench_function("parse_and_optimize", |b| {
        b.iter(|| black_box(parse_operand(black_box(&spec)).unwrap().optimize().unwrap()));
    });
    group.finish();
}

fn run(spec: &[Value], input: Vec<quarry_codec::Document>) -> usize {
    let ctx = ExpressionContext::detached();
    let mut pipeline = Pipeline::parse(spec, ctx.clone()).unwrap();
    pipeline.optimize().unwrap();
    pipeline.run(Box::new(ArraySource::new(input, ctx))).unwrap().len()
}

/// Benchmark whole pipelines over in-memory input.
fn bench_pipelines(c: &mut Criterion) {
    for (name, json) in [("group_by_item", GROUP_BY_ITEM), ("top_ten", TOP_TEN)] {
        let mut group = c.benchmark_group(name);
        let spec = stages(json);
        for count in [100, 1_000, 10_000] {
            let input = sales(count);
            group.throughput(Throughput::Elements(count as u64));
            group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
                b.iter(|| black_box(run(&spec, input.clone())));
            });
        }
        group.finish();
    }
}

/// Benchmark running the shard and merge halves of a split pipeline.
fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_group");
    let spec = stages(GROUP_BY_ITEM);
    let input = sales(5_000);
    group.throughput(Throughput::Elements(input.len() as u64));

    group.bench_function("direct", |b| {
        b.iter(|| black_box(run(&spec, input.clone())));
    });

    group.bench_function("shard_then_merge", |b| {
        b.iter(|| {
            let ctx = ExpressionContext::detached();
            let mut merge = Pipeline::parse(&spec, ctx.clone()).unwrap();
            merge.optimize().unwrap();
            let shard = merge.split();
            let partial = shard.run(Box::new(ArraySource::new(input.clone(), ctx.clone()))).unwrap();
            black_box(merge.run(Box::new(ArraySource::new(partial, ctx))).unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_expression, bench_pipelines, bench_split);
criterion_main!(benches);
