//! Range query benchmarks over the in-memory querier.
//!
//! Measures evaluator construction, window sliding and the series joiner for
//! a grouped aggregation and a vector/vector binary operation. Sample data is
//! generated once outside the measured section.
//!
//! Run:
//!   cargo bench -p opendata-logql --bench range_query

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use logql::syntax::{
    BinaryOp, Expr, Grouping, LogRangeExpr, LogSelectorExpr, RangeOp, SampleExpr, VectorOp,
};
use logql::testing::MemoryQuerier;
use logql::{
    Engine, EngineConfig, LabelMatcher, Labels, LimitsConfig, Params, QueryContext, Sample,
    Timestamp,
};

mod common;

const NUM_STEPS: i64 = 60;
const STEP_SECS: i64 = 60;

/// `num_series` series of `app="bench"`, one sample every second across the
/// whole query span.
fn make_samples(num_series: usize) -> Vec<Sample> {
    let end_secs = NUM_STEPS * STEP_SECS;
    let mut samples = Vec::with_capacity(num_series * end_secs as usize);
    for i in 0..num_series {
        let labels = Labels::from_pairs([
            ("app", "bench".to_string()),
            ("pod", format!("pod-{i}")),
            ("zone", format!("zone-{}", i % 4)),
        ]);
        for s in 1..=end_secs {
            samples.push(Sample::new(labels.clone(), s * 1000, (s % 7) as f64));
        }
    }
    samples
}

fn rate_bench(range_secs: u64) -> SampleExpr {
    SampleExpr::range(
        RangeOp::Rate,
        LogRangeExpr::new(
            LogSelectorExpr::new(vec![LabelMatcher::equal("app", "bench")]),
            Duration::from_secs(range_secs),
        ),
    )
}

fn params(expr: SampleExpr) -> Params {
    Params::range(
        Expr::Sample(expr),
        Timestamp::from_secs(STEP_SECS),
        Timestamp::from_secs(NUM_STEPS * STEP_SECS),
        Duration::from_secs(STEP_SECS as u64),
    )
}

fn bench_range_queries(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    let limits = LimitsConfig {
        max_query_series: 100_000,
        ..LimitsConfig::default()
    };

    let queries = [
        (
            "sum_by_zone",
            SampleExpr::aggregate(VectorOp::Sum, Some(Grouping::by(["zone"])), rate_bench(300)),
        ),
        (
            "binop_ratio",
            SampleExpr::binary(BinaryOp::Div, rate_bench(60), rate_bench(300)),
        ),
    ];

    let mut group = c.benchmark_group("range_query");
    for num_series in [10, 100] {
        let querier = Arc::new(MemoryQuerier::new().with_samples(make_samples(num_series)));
        let engine = Engine::new(EngineConfig::default(), querier, Arc::new(limits.clone()));
        group.throughput(Throughput::Elements((num_series as i64 * NUM_STEPS) as u64));

        for (name, expr) in &queries {
            group.bench_with_input(BenchmarkId::new(*name, num_series), expr, |b, expr| {
                b.to_async(&runtime).iter(|| async {
                    engine
                        .query(params(expr.clone()))
                        .exec(&QueryContext::new())
                        .await
                        .expect("query failed")
                })
            });
        }
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = common::default_criterion();
    targets = bench_range_queries
}
criterion_main!(benches);
