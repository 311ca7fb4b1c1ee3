use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{EngineConfig, Limits};
use crate::context::{QueryContext, Statistics};
use crate::error::{QueryError, Result};
use crate::evaluator::{DefaultEvaluatorFactory, EvaluatorFactory, StepEvaluator, StepResult};
use crate::iter::EntryIterator;
use crate::joiner::{join_multi_variant_sample_vector, join_sample_vector};
use crate::labels::Labels;
use crate::model::{Entry, Point, QueryValue, Series, Stream};
use crate::params::{Direction, Params};
use crate::querier::{Querier, SelectLogParams};
use crate::syntax::{Expr, LogRangeExpr, LogSelectorExpr};
use crate::timestamp::Timestamp;

/// Outcome of a successful query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub data: QueryValue,
    pub statistics: Statistics,
    /// Soft limit violations, e.g. a truncated drilldown result.
    pub warnings: Vec<String>,
}

/// Entry point for evaluating parsed LogQL queries.
pub struct Engine {
    config: EngineConfig,
    querier: Arc<dyn Querier>,
    limits: Arc<dyn Limits>,
    factory: Arc<dyn EvaluatorFactory>,
}

impl Engine {
    pub fn new(config: EngineConfig, querier: Arc<dyn Querier>, limits: Arc<dyn Limits>) -> Self {
        let factory = Arc::new(DefaultEvaluatorFactory::new(querier.clone()));
        Self {
            config,
            querier,
            limits,
            factory,
        }
    }

    /// Replaces the factory building evaluator trees for metric queries.
    pub fn with_evaluator_factory(mut self, factory: Arc<dyn EvaluatorFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn query(&self, params: Params) -> Query {
        Query {
            params,
            config: self.config.clone(),
            querier: self.querier.clone(),
            limits: self.limits.clone(),
            factory: self.factory.clone(),
        }
    }
}

/// A query bound to its parameters, ready to run.
pub struct Query {
    params: Params,
    config: EngineConfig,
    querier: Arc<dyn Querier>,
    limits: Arc<dyn Limits>,
    factory: Arc<dyn EvaluatorFactory>,
}

impl Query {
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Runs the query under the configured timeout.
    ///
    /// The timeout bounds both the awaited selections and the synchronous
    /// step loop, which checks the deadline between steps.
    ///
    /// Warnings and statistics are collected on `ctx` and copied into the
    /// result; they remain readable on `ctx` when the query fails.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(
            query = %self.params.query(),
            instant = self.params.is_instant(),
            series = tracing::field::Empty
        )
    )]
    pub async fn exec(&self, ctx: &QueryContext) -> Result<QueryResult> {
        if self.config.log_executing_query {
            tracing::info!(query = %self.params.query(), "executing query");
        }
        let started = Instant::now();
        let timeout = self.limits.query_timeout();
        let deadline_ctx;
        let ctx = if timeout.is_zero() {
            ctx
        } else {
            deadline_ctx = ctx.clone().with_deadline(started + timeout);
            &deadline_ctx
        };
        let cancel = ctx.cancellation_token();
        let data = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            data = with_timeout(timeout, self.eval(ctx)) => data,
        };

        let elapsed = started.elapsed();
        ctx.record(|s| s.exec_time = elapsed);
        let data = match data {
            Ok(data) => data,
            Err(err) => {
                tracing::debug!(error = %err, duration = ?elapsed, "query failed");
                return Err(err);
            }
        };

        let series = data.series_count();
        ctx.record(|s| s.series_returned = series as u64);
        tracing::Span::current().record("series", series);
        let statistics = ctx.statistics();
        tracing::debug!(
            steps = statistics.steps_evaluated,
            samples = statistics.samples_processed,
            series,
            duration = ?elapsed,
            "query completed"
        );
        Ok(QueryResult {
            data,
            statistics,
            warnings: ctx.warnings(),
        })
    }

    async fn eval(&self, ctx: &QueryContext) -> Result<QueryValue> {
        let params = &self.params;
        match params.expr() {
            Expr::Variants(expr) => {
                if !self.limits.multi_variant_queries_enabled() {
                    return Err(QueryError::VariantsDisabled);
                }
                self.check_intervals(expr.log_ranges())?;
                for variant in &expr.variants {
                    variant.validate()?;
                }
                let mut evaluator = self.factory.variants_evaluator(ctx, expr, params).await?;
                let max_series = self.limits.max_query_series();
                drive(evaluator.as_mut(), |first, evaluator| {
                    join_multi_variant_sample_vector(ctx, first, evaluator, params, max_series)
                })
            }
            Expr::Sample(expr) => {
                self.check_intervals(expr.log_ranges())?;
                expr.validate()?;
                if let Some(value) = expr.fold_literal() {
                    return Ok(self.literal(value));
                }
                let mut evaluator = self.factory.sample_evaluator(ctx, expr, params).await?;
                let max_series = self.limits.max_query_series();
                let sortable = expr.is_sortable();
                drive(evaluator.as_mut(), |first, evaluator| {
                    join_sample_vector(ctx, first, evaluator, params, max_series, sortable)
                })
            }
            Expr::Log(selector) => self.eval_logs(ctx, selector).await,
        }
    }

    /// Rejects selectors spanning more than the configured maximum before
    /// anything is read.
    fn check_intervals<'a>(&self, ranges: impl IntoIterator<Item = &'a LogRangeExpr>) -> Result<()> {
        let limit = self.limits.max_query_range();
        if limit.is_zero() {
            return Ok(());
        }
        match ranges.into_iter().find(|r| r.interval > limit) {
            Some(range) => Err(QueryError::IntervalLimit {
                interval: range.interval,
                limit,
            }),
            None => Ok(()),
        }
    }

    /// A scalar for instant queries, a single label-less series otherwise.
    fn literal(&self, value: f64) -> QueryValue {
        let params = &self.params;
        if params.is_instant() {
            return QueryValue::Scalar(Point::new(params.end().as_millis(), value));
        }
        let points: Vec<Point> = Timestamp::steps(params.start(), params.end(), params.step())
            .map(|ts| Point::new(ts.as_millis(), value))
            .collect();
        QueryValue::Matrix(vec![Series {
            labels: Labels::empty(),
            points,
        }])
    }

    #[tracing::instrument(level = "debug", skip_all, fields(selector = %selector))]
    async fn eval_logs(&self, ctx: &QueryContext, selector: &LogSelectorExpr) -> Result<QueryValue> {
        let params = &self.params;
        let start = if params.is_instant() {
            params.end() - self.config.max_look_back_period()
        } else {
            params.start()
        };
        let select = SelectLogParams {
            selector: selector.clone(),
            start,
            end: params.end(),
            direction: params.direction(),
            limit: params.limit(),
            shards: params.shards().to_vec(),
        };
        tracing::debug!(start = %select.start, end = %select.end, "selecting logs");

        let cancel = ctx.cancellation_token();
        let mut iter = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            it = self.querier.select_logs(ctx, select) => it,
        }?;
        let streams = read_streams(
            iter.as_mut(),
            params.direction(),
            params.interval(),
            params.limit(),
        );
        if let Err(err) = iter.close() {
            tracing::warn!(error = %err, "failed to close entry iterator");
        }
        let streams = streams?;
        let entries: usize = streams.iter().map(|s| s.entries.len()).sum();
        ctx.record(|s| s.entries_returned += entries as u64);
        Ok(QueryValue::Streams(streams))
    }
}

async fn with_timeout<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| QueryError::Timeout)?
}

/// Pulls the first step and hands the evaluator to `join`, closing it
/// whatever the outcome.
fn drive(
    evaluator: &mut dyn StepEvaluator,
    join: impl FnOnce((i64, StepResult), &mut dyn StepEvaluator) -> Result<QueryValue>,
) -> Result<QueryValue> {
    let result = match evaluator.next() {
        Some(first) => join(first, evaluator),
        None => Err(evaluator
            .error()
            .unwrap_or_else(|| QueryError::Internal("unexpected empty result".to_string()))),
    };
    if let Err(err) = evaluator.close() {
        tracing::warn!(error = %err, "failed to close step evaluator");
    }
    result
}

/// Collects log entries into streams ordered by label set.
///
/// With a non-zero `interval`, an entry is only kept when it lies at least
/// `interval` after (forward) or before (backward) the previously kept entry
/// of any stream. A `limit` of 0 means unlimited.
fn read_streams(
    iter: &mut dyn EntryIterator,
    direction: Direction,
    interval: Duration,
    limit: u32,
) -> Result<Vec<Stream>> {
    let interval_ms = interval.as_millis() as i64;
    let mut streams: BTreeMap<Labels, Vec<Entry>> = BTreeMap::new();
    let mut last: Option<i64> = None;
    let mut count = 0u32;
    while limit == 0 || count < limit {
        let Some((labels, entry)) = iter.next() else {
            break;
        };
        if interval_ms > 0 {
            let keep = match (last, direction) {
                (None, _) => true,
                (Some(last), Direction::Forward) => entry.timestamp_ms >= last + interval_ms,
                (Some(last), Direction::Backward) => entry.timestamp_ms <= last - interval_ms,
            };
            if !keep {
                continue;
            }
            last = Some(entry.timestamp_ms);
        }
        streams.entry(labels).or_default().push(entry);
        count += 1;
    }
    if let Some(err) = iter.error() {
        return Err(err);
    }
    Ok(streams
        .into_iter()
        .map(|(labels, entries)| Stream { labels, entries })
        .collect())
}
