//! Folds the per-step output of an evaluator tree into a query result while
//! enforcing the series limit.
//!
//! Ordinary callers fail as soon as the number of distinct series exceeds the
//! limit. Drilldown callers get a truncated result and a warning instead:
//! series accepted in earlier steps keep receiving points, new series are only
//! admitted while budget remains.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::evaluator::{StepEvaluator, StepResult};
use crate::labels::{Labels, VARIANT_LABEL};
use crate::model::{Matrix, Point, QueryValue, Series, Vector, sort_by_labels};
use crate::params::Params;

fn truncation_warning(max_series: usize) -> String {
    format!(
        "maximum number of series ({max_series}) reached for a single query; returning partial results"
    )
}

/// Accumulates step vectors into a matrix ordered by label set.
struct MatrixBuilder {
    series: BTreeMap<Labels, Vec<Point>>,
    max_series: usize,
    drilldown: bool,
    truncated: bool,
}

impl MatrixBuilder {
    fn new(max_series: usize, drilldown: bool) -> Self {
        Self {
            series: BTreeMap::new(),
            max_series,
            drilldown,
            truncated: false,
        }
    }

    fn push(&mut self, ctx: &QueryContext, mut vector: Vector) -> Result<()> {
        if self.drilldown {
            sort_by_labels(&mut vector);
        }
        for sample in vector {
            let point = sample.point();
            if let Some(points) = self.series.get_mut(&sample.labels) {
                points.push(point);
                continue;
            }
            if self.drilldown && self.series.len() >= self.max_series {
                if !self.truncated {
                    self.truncated = true;
                    tracing::warn!(max_series = self.max_series, "truncating range query result");
                    ctx.add_warning(truncation_warning(self.max_series));
                }
                continue;
            }
            self.series.insert(sample.labels, vec![point]);
        }
        if !self.drilldown && self.series.len() > self.max_series {
            return Err(QueryError::SeriesLimit {
                max: self.max_series,
            });
        }
        Ok(())
    }

    fn remove_variant(&mut self, variant: &str) {
        self.series
            .retain(|labels, _| labels.get(VARIANT_LABEL) != Some(variant));
    }

    fn build(self) -> Matrix {
        self.series
            .into_iter()
            .map(|(labels, points)| Series { labels, points })
            .collect()
    }
}

/// Applies the series limit to the single vector of an instant query.
fn limit_instant(
    ctx: &QueryContext,
    mut vector: Vector,
    max_series: usize,
    sortable: bool,
) -> Result<Vector> {
    if !sortable {
        sort_by_labels(&mut vector);
    }
    if vector.len() > max_series {
        if !ctx.is_drilldown() {
            return Err(QueryError::SeriesLimit { max: max_series });
        }
        tracing::warn!(
            max_series,
            series = vector.len(),
            "truncating instant query result"
        );
        ctx.add_warning(truncation_warning(max_series));
        vector.truncate(max_series);
    }
    Ok(vector)
}

/// Pulls the remaining steps of `evaluator`, feeding each vector to `f`.
fn for_each_step(
    ctx: &QueryContext,
    evaluator: &mut dyn StepEvaluator,
    mut f: impl FnMut(Vector) -> Result<()>,
) -> Result<()> {
    while let Some((_, result)) = evaluator.next() {
        ctx.check_interrupted()?;
        ctx.record(|s| s.steps_evaluated += 1);
        f(result.into_samples()?)?;
    }
    evaluator.error().map_or(Ok(()), Err)
}

/// Joins the steps of an ordinary sample evaluator.
///
/// `first` is the already pulled first step. Instant queries return its
/// vector; range queries keep pulling and return a matrix.
pub(crate) fn join_sample_vector(
    ctx: &QueryContext,
    first: (i64, StepResult),
    evaluator: &mut dyn StepEvaluator,
    params: &Params,
    max_series: usize,
    sortable: bool,
) -> Result<QueryValue> {
    ctx.record(|s| s.steps_evaluated += 1);
    let vector = first.1.into_samples()?;

    if params.is_instant() {
        return limit_instant(ctx, vector, max_series, sortable).map(QueryValue::Vector);
    }

    let mut matrix = MatrixBuilder::new(max_series, ctx.is_drilldown());
    matrix.push(ctx, vector)?;
    for_each_step(ctx, evaluator, |vector| matrix.push(ctx, vector))?;
    Ok(QueryValue::Matrix(matrix.build()))
}

/// Tracks the distinct series of every variant and drops the variants that
/// exceed the limit on their own.
struct VariantLimiter {
    max_series: usize,
    seen: BTreeMap<String, HashSet<Labels>>,
    over_limit: BTreeSet<String>,
}

impl VariantLimiter {
    fn new(max_series: usize) -> Self {
        Self {
            max_series,
            seen: BTreeMap::new(),
            over_limit: BTreeSet::new(),
        }
    }

    /// Returns the samples of variants still within the limit and the
    /// variants that crossed it with this vector.
    fn filter(&mut self, ctx: &QueryContext, vector: Vector) -> (Vector, Vec<String>) {
        let mut crossed = Vec::new();
        for sample in &vector {
            let variant = sample.labels.get(VARIANT_LABEL).unwrap_or_default();
            if self.over_limit.contains(variant) {
                continue;
            }
            let seen = self.seen.entry(variant.to_string()).or_default();
            seen.insert(sample.labels.clone());
            if seen.len() > self.max_series {
                tracing::warn!(
                    variant,
                    max_series = self.max_series,
                    "dropping variant over series limit"
                );
                ctx.add_warning(format!(
                    "maximum of series ({}) reached for variant ({variant})",
                    self.max_series
                ));
                self.over_limit.insert(variant.to_string());
                self.seen.remove(variant);
                crossed.push(variant.to_string());
            }
        }
        let kept = vector
            .into_iter()
            .filter(|s| {
                !self
                    .over_limit
                    .contains(s.labels.get(VARIANT_LABEL).unwrap_or_default())
            })
            .collect();
        (kept, crossed)
    }
}

/// Joins the steps of a variants evaluator.
///
/// Each variant is first checked against the limit on its own; a variant
/// exceeding it is dropped from the whole result with a warning. The
/// surviving, variant-tagged series are then joined under the ordinary rules.
pub(crate) fn join_multi_variant_sample_vector(
    ctx: &QueryContext,
    first: (i64, StepResult),
    evaluator: &mut dyn StepEvaluator,
    params: &Params,
    max_series: usize,
) -> Result<QueryValue> {
    ctx.record(|s| s.steps_evaluated += 1);
    let vector = first.1.into_samples()?;
    let mut limiter = VariantLimiter::new(max_series);

    if params.is_instant() {
        let (vector, _) = limiter.filter(ctx, vector);
        return limit_instant(ctx, vector, max_series, false).map(QueryValue::Vector);
    }

    let mut matrix = MatrixBuilder::new(max_series, ctx.is_drilldown());
    let mut push = |vector: Vector| {
        let (vector, crossed) = limiter.filter(ctx, vector);
        for variant in &crossed {
            matrix.remove_variant(variant);
        }
        matrix.push(ctx, vector)
    };
    push(vector)?;
    for_each_step(ctx, evaluator, &mut push)?;
    Ok(QueryValue::Matrix(matrix.build()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::evaluator::test_utils::{MockStepEvaluator, sample};
    use crate::model::Sample;
    use crate::syntax::{Expr, SampleExpr};
    use crate::timestamp::Timestamp;

    const DRILLDOWN_TAGS: &str = "Source=grafana-lokiexplore-app,Feature=patterns";

    fn instant() -> Params {
        Params::instant(Expr::Sample(SampleExpr::Vector(0.0)), Timestamp::from_secs(60))
    }

    fn range(steps: u64) -> Params {
        Params::range(
            Expr::Sample(SampleExpr::Vector(0.0)),
            Timestamp::from_secs(60),
            Timestamp::from_secs(60 * steps as i64),
            Duration::from_secs(60),
        )
    }

    fn apps(ts: i64, names: &[&str]) -> Vector {
        names
            .iter()
            .map(|app| sample(&[("app", app)], ts, 1.0))
            .collect()
    }

    fn variant(ts: i64, index: &str, names: &[&str]) -> Vector {
        names
            .iter()
            .map(|app| sample(&[("__variant__", index), ("app", app)], ts, 1.0))
            .collect()
    }

    /// Splits the steps into the already pulled first one and the rest.
    fn steps(mut steps: Vec<(i64, Vector)>) -> ((i64, StepResult), MockStepEvaluator) {
        let rest = steps.split_off(1);
        let (ts, first) = steps.remove(0);
        ((ts, StepResult::Samples(first)), MockStepEvaluator::new(rest))
    }

    fn labels_of(value: &QueryValue) -> Vec<Labels> {
        match value {
            QueryValue::Vector(v) => v.iter().map(|s| s.labels.clone()).collect(),
            QueryValue::Matrix(m) => m.iter().map(|s| s.labels.clone()).collect(),
            _ => vec![],
        }
    }

    #[test]
    fn should_sort_instant_vector_by_labels() {
        // given:
        let (first, mut ev) = steps(vec![(60_000, apps(60_000, &["foo", "bar"]))]);

        // when:
        let value =
            join_sample_vector(&QueryContext::new(), first, &mut ev, &instant(), 10, false)
                .unwrap();

        // then:
        assert_eq!(
            labels_of(&value),
            vec![
                Labels::from_pairs([("app", "bar")]),
                Labels::from_pairs([("app", "foo")])
            ]
        );
    }

    #[test]
    fn should_keep_value_order_of_sorted_expressions() {
        let (first, mut ev) = steps(vec![(60_000, apps(60_000, &["foo", "bar"]))]);

        let value =
            join_sample_vector(&QueryContext::new(), first, &mut ev, &instant(), 10, true)
                .unwrap();

        assert_eq!(labels_of(&value)[0], Labels::from_pairs([("app", "foo")]));
    }

    #[test]
    fn should_fail_instant_query_over_series_limit() {
        let (first, mut ev) = steps(vec![(60_000, apps(60_000, &["a", "b", "c"]))]);

        let result = join_sample_vector(&QueryContext::new(), first, &mut ev, &instant(), 2, false);

        assert_eq!(result, Err(QueryError::SeriesLimit { max: 2 }));
    }

    #[test]
    fn should_truncate_instant_query_for_drilldown() {
        // given:
        let ctx = QueryContext::new().with_tags(DRILLDOWN_TAGS);
        let (first, mut ev) = steps(vec![(60_000, apps(60_000, &["c", "a", "b"]))]);

        // when:
        let value = join_sample_vector(&ctx, first, &mut ev, &instant(), 2, false).unwrap();

        // then:
        assert_eq!(
            labels_of(&value),
            vec![
                Labels::from_pairs([("app", "a")]),
                Labels::from_pairs([("app", "b")])
            ]
        );
        assert_eq!(
            ctx.warnings(),
            vec![
                "maximum number of series (2) reached for a single query; returning partial results"
                    .to_string()
            ]
        );
    }

    #[test]
    fn should_accumulate_points_per_series() {
        // given:
        let ctx = QueryContext::new();
        let (first, mut ev) = steps(vec![
            (60_000, apps(60_000, &["foo"])),
            (120_000, apps(120_000, &["foo", "bar"])),
            (180_000, vec![]),
        ]);

        // when:
        let value = join_sample_vector(&ctx, first, &mut ev, &range(3), 10, false).unwrap();

        // then:
        assert_eq!(
            value,
            QueryValue::Matrix(vec![
                Series {
                    labels: Labels::from_pairs([("app", "bar")]),
                    points: vec![Point::new(120_000, 1.0)],
                },
                Series {
                    labels: Labels::from_pairs([("app", "foo")]),
                    points: vec![Point::new(60_000, 1.0), Point::new(120_000, 1.0)],
                },
            ])
        );
        assert_eq!(ctx.statistics().steps_evaluated, 3);
    }

    #[test]
    fn should_fail_range_query_when_distinct_series_exceed_limit() {
        // given: never more than one series per step
        let (first, mut ev) = steps(vec![
            (60_000, apps(60_000, &["a"])),
            (120_000, apps(120_000, &["b"])),
        ]);

        // when:
        let result = join_sample_vector(&QueryContext::new(), first, &mut ev, &range(2), 1, false);

        // then:
        assert_eq!(result, Err(QueryError::SeriesLimit { max: 1 }));
    }

    #[test]
    fn should_admit_new_series_only_within_budget_for_drilldown() {
        // given:
        let ctx = QueryContext::new().with_tags(DRILLDOWN_TAGS);
        let (first, mut ev) = steps(vec![
            (60_000, apps(60_000, &["a", "b"])),
            (120_000, apps(120_000, &["d", "c"])),
        ]);

        // when:
        let value = join_sample_vector(&ctx, first, &mut ev, &range(2), 3, false).unwrap();

        // then:
        assert_eq!(
            labels_of(&value),
            vec![
                Labels::from_pairs([("app", "a")]),
                Labels::from_pairs([("app", "b")]),
                Labels::from_pairs([("app", "c")]),
            ]
        );
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[test]
    fn should_never_replace_accepted_series_with_later_larger_steps() {
        // given:
        let ctx = QueryContext::new().with_tags(DRILLDOWN_TAGS);
        let (first, mut ev) = steps(vec![
            (60_000, apps(60_000, &["x", "y", "z"])),
            (120_000, apps(120_000, &["a", "b", "x", "y"])),
            (180_000, apps(180_000, &["a", "b", "c", "x", "y"])),
        ]);

        // when:
        let value = join_sample_vector(&ctx, first, &mut ev, &range(3), 2, false).unwrap();

        // then:
        let QueryValue::Matrix(matrix) = value else {
            panic!("expected a matrix");
        };
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix[0].labels, Labels::from_pairs([("app", "x")]));
        assert_eq!(matrix[0].points.len(), 3);
        assert_eq!(matrix[1].labels, Labels::from_pairs([("app", "y")]));
        assert_eq!(ctx.warnings().len(), 1);
        assert!(ctx.warnings()[0].contains("maximum number of series"));
    }

    #[test]
    fn should_surface_evaluator_error_after_last_step() {
        let mock_err = QueryError::Querier("mock error".to_string());
        let (first, ev) = steps(vec![(60_000, apps(60_000, &["a"])), (120_000, vec![])]);
        let mut ev = ev.failing(mock_err.clone());

        let result = join_sample_vector(&QueryContext::new(), first, &mut ev, &range(3), 10, false);

        assert_eq!(result, Err(mock_err));
    }

    #[test]
    fn should_stop_when_cancelled() {
        let ctx = QueryContext::new();
        ctx.cancellation_token().cancel();
        let (first, mut ev) = steps(vec![(60_000, apps(60_000, &["a"])), (120_000, vec![])]);

        let result = join_sample_vector(&ctx, first, &mut ev, &range(2), 10, false);

        assert_eq!(result, Err(QueryError::Cancelled));
    }

    #[test]
    fn should_time_out_once_deadline_passed() {
        let ctx = QueryContext::new().with_deadline(std::time::Instant::now());
        let (first, mut ev) = steps(vec![(60_000, apps(60_000, &["a"])), (120_000, vec![])]);

        let result = join_sample_vector(&ctx, first, &mut ev, &range(2), 10, false);

        assert_eq!(result, Err(QueryError::Timeout));
    }

    #[test]
    fn should_truncate_identically_whatever_the_arrival_order() {
        // given: the same rows, in a different order within each step
        let run = |step1: &[&str], step2: &[&str]| {
            let ctx = QueryContext::new().with_tags(DRILLDOWN_TAGS);
            let (first, mut ev) = steps(vec![
                (60_000, apps(60_000, step1)),
                (120_000, apps(120_000, step2)),
            ]);
            let value = join_sample_vector(&ctx, first, &mut ev, &range(2), 3, false).unwrap();
            (value, ctx.warnings())
        };

        // when:
        let forward = run(&["d", "b", "e"], &["a", "c", "f", "b"]);
        let reversed = run(&["e", "b", "d"], &["b", "f", "c", "a"]);

        // then:
        assert_eq!(forward, reversed);
        assert_eq!(
            labels_of(&forward.0),
            vec![
                Labels::from_pairs([("app", "b")]),
                Labels::from_pairs([("app", "d")]),
                Labels::from_pairs([("app", "e")]),
            ]
        );
        assert_eq!(
            forward.1,
            vec![
                "maximum number of series (3) reached for a single query; returning partial results"
                    .to_string()
            ]
        );
    }

    #[test]
    fn should_drop_instant_variant_over_limit() {
        // given:
        let ctx = QueryContext::new();
        let mut vector = variant(60_000, "0", &["a", "b", "c"]);
        vector.extend(variant(60_000, "1", &["foo", "bar"]));
        let (first, mut ev) = steps(vec![(60_000, vector)]);

        // when:
        let value =
            join_multi_variant_sample_vector(&ctx, first, &mut ev, &instant(), 2).unwrap();

        // then:
        assert_eq!(
            labels_of(&value),
            vec![
                Labels::from_pairs([("__variant__", "1"), ("app", "bar")]),
                Labels::from_pairs([("__variant__", "1"), ("app", "foo")]),
            ]
        );
        assert_eq!(
            ctx.warnings(),
            vec!["maximum of series (2) reached for variant (0)".to_string()]
        );
    }

    #[test]
    fn should_drop_range_variant_over_limit_across_steps() {
        // given:
        let ctx = QueryContext::new();
        let mut step1 = variant(60_000, "0", &["a"]);
        step1.extend(variant(60_000, "1", &["w", "x"]));
        let mut step2 = variant(120_000, "0", &["a"]);
        step2.extend(variant(120_000, "1", &["w", "x", "y", "z"]));
        let (first, mut ev) = steps(vec![(60_000, step1), (120_000, step2)]);

        // when:
        let value = join_multi_variant_sample_vector(&ctx, first, &mut ev, &range(2), 3).unwrap();

        // then:
        let QueryValue::Matrix(matrix) = value else {
            panic!("expected a matrix");
        };
        assert_eq!(matrix.len(), 1);
        assert_eq!(
            matrix[0].labels,
            Labels::from_pairs([("__variant__", "0"), ("app", "a")])
        );
        assert_eq!(matrix[0].points.len(), 2);
        assert_eq!(
            ctx.warnings(),
            vec!["maximum of series (3) reached for variant (1)".to_string()]
        );
    }

    #[test]
    fn should_check_combined_variant_series_against_limit() {
        // given: each variant fits on its own
        let mut vector = variant(60_000, "0", &["a", "b"]);
        vector.extend(variant(60_000, "1", &["a", "b"]));
        let (first, mut ev) = steps(vec![(60_000, vector)]);

        // when:
        let result =
            join_multi_variant_sample_vector(&QueryContext::new(), first, &mut ev, &range(2), 3);

        // then:
        assert_eq!(result, Err(QueryError::SeriesLimit { max: 3 }));
    }

    #[test]
    fn should_check_combined_instant_variant_series_against_limit() {
        let mut vector = variant(60_000, "0", &["foo", "bar"]);
        vector.extend(variant(60_000, "1", &["foo", "bar"]));
        let (first, mut ev) = steps(vec![(60_000, vector)]);

        let result =
            join_multi_variant_sample_vector(&QueryContext::new(), first, &mut ev, &instant(), 3);

        assert_eq!(result, Err(QueryError::SeriesLimit { max: 3 }));
    }

    #[test]
    fn should_reject_sketch_steps() {
        let first = (60_000, StepResult::QuantileSketches(vec![]));
        let mut ev = MockStepEvaluator::new(vec![]);

        let result = join_sample_vector(&QueryContext::new(), first, &mut ev, &instant(), 10, false);

        assert!(matches!(result, Err(QueryError::Internal(_))));
    }

    #[test]
    fn should_return_instant_vector_at_exact_limit() {
        let vector: Vec<Sample> = apps(60_000, &["a", "b"]);
        let (first, mut ev) = steps(vec![(60_000, vector.clone())]);

        let value =
            join_sample_vector(&QueryContext::new(), first, &mut ev, &instant(), 2, false)
                .unwrap();

        assert_eq!(value, QueryValue::Vector(vector));
    }
}
