//! Step evaluators: one pull-based node per expression node.
//!
//! The tree is built bottom-up by an [`EvaluatorFactory`], the only place that
//! talks to the [`Querier`]. Once built, stepping is synchronous: every call to
//! [`StepEvaluator::next`] yields the result of the next step timestamp in
//! increasing order until the evaluator is exhausted or fails.

mod aggregation;
mod binop;
mod literal;
mod range;
mod variants;
mod vector_matching;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::iter::{SampleIterator, VecSampleIterator};
use crate::labels::Labels;
use crate::model::{Sample, Vector};
use crate::params::Params;
use crate::querier::{Querier, SelectSampleParams};
use crate::syntax::{Expr, SampleExpr, VariantsExpr};
use crate::timestamp::Timestamp;

pub use aggregation::{LabelReplaceEvaluator, VectorAggregationEvaluator};
pub use binop::BinOpEvaluator;
pub use literal::{LiteralEvaluator, VectorEvaluator};
pub use range::RangeVectorEvaluator;
pub use variants::VariantsEvaluator;
pub use vector_matching::vector_binop;

/// Opaque quantile sketch of one series at one step.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileSketchSample {
    pub labels: Labels,
    pub timestamp_ms: i64,
    pub sketch: Vec<u8>,
}

/// Opaque count-min sketch with the label sets it tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMinSketchVector {
    pub timestamp_ms: i64,
    pub sketch: Vec<u8>,
    pub labels: Vec<Labels>,
}

/// Output of one evaluator for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Samples(Vector),
    QuantileSketches(Vec<QuantileSketchSample>),
    CountMinSketch(CountMinSketchVector),
}

impl StepResult {
    /// The instant vector, or an error naming the unexpected payload.
    pub fn into_samples(self) -> Result<Vector> {
        match self {
            StepResult::Samples(v) => Ok(v),
            StepResult::QuantileSketches(_) => Err(QueryError::Internal(
                "unsupported result type: quantile sketch vector".to_string(),
            )),
            StepResult::CountMinSketch(_) => Err(QueryError::Internal(
                "unsupported result type: count-min sketch vector".to_string(),
            )),
        }
    }
}

/// Pull-based evaluator of one expression node.
///
/// `next` returns `None` once the evaluator is exhausted or has failed; the
/// caller must then consult `error`. Both terminal states are sticky: later
/// calls to `next` return `None` without touching children. `close` releases
/// the evaluator's children and iterators and must close all of them even
/// when one fails.
pub trait StepEvaluator: Send {
    fn next(&mut self) -> Option<(i64, StepResult)>;

    fn error(&self) -> Option<QueryError>;

    fn close(&mut self) -> Result<()>;
}

/// Pulls the next instant vector out of a child evaluator.
///
/// `Ok(None)` is exhaustion; a sketch payload is an error since composite
/// operators only work on samples.
pub(crate) fn next_vector(child: &mut dyn StepEvaluator) -> Result<Option<(i64, Vector)>> {
    match child.next() {
        Some((ts, result)) => Ok(Some((ts, result.into_samples()?))),
        None => Ok(None),
    }
}

/// Closes every child, folding failures into one error.
pub(crate) fn close_all<'a>(
    children: impl IntoIterator<Item = &'a mut Box<dyn StepEvaluator>>,
) -> Result<()> {
    let errors: Vec<QueryError> = children
        .into_iter()
        .filter_map(|c| c.close().err())
        .collect();
    QueryError::from_many(errors).map_or(Ok(()), Err)
}

/// Builds evaluator trees.
///
/// A trait so that the engine can be driven by a substitute in tests.
#[async_trait]
pub trait EvaluatorFactory: Send + Sync {
    async fn sample_evaluator(
        &self,
        ctx: &QueryContext,
        expr: &SampleExpr,
        params: &Params,
    ) -> Result<Box<dyn StepEvaluator>>;

    async fn variants_evaluator(
        &self,
        ctx: &QueryContext,
        expr: &VariantsExpr,
        params: &Params,
    ) -> Result<Box<dyn StepEvaluator>>;
}

/// Where range-aggregation leaves read their samples from.
enum SampleSource {
    Querier,
    /// Samples already selected for one variant.
    Buffered(Vec<Sample>),
}

/// Factory selecting leaf samples through a [`Querier`].
pub struct DefaultEvaluatorFactory {
    querier: Arc<dyn Querier>,
}

impl DefaultEvaluatorFactory {
    pub fn new(querier: Arc<dyn Querier>) -> Self {
        Self { querier }
    }

    async fn leaf_iterator(
        &self,
        ctx: &QueryContext,
        expr: &SampleExpr,
        params: &Params,
        source: &SampleSource,
    ) -> Result<Box<dyn SampleIterator>> {
        match source {
            SampleSource::Buffered(samples) => {
                Ok(Box::new(VecSampleIterator::new(samples.clone())))
            }
            SampleSource::Querier => {
                let SampleExpr::RangeAggregation(range) = expr else {
                    return Err(QueryError::Internal(format!(
                        "cannot select samples for {expr}"
                    )));
                };
                let select = SelectSampleParams {
                    expr: Expr::Sample(expr.clone()),
                    start: params.start() - range.left.interval - range.left.offset,
                    end: params.end() - range.left.offset,
                    shards: params.shards().to_vec(),
                };
                tracing::debug!(
                    selector = %select.selector(),
                    start = %select.start,
                    end = %select.end,
                    "selecting samples"
                );
                let cancel = ctx.cancellation_token();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(QueryError::Cancelled),
                    it = self.querier.select_samples(ctx, select) => it,
                }
            }
        }
    }

    // Recurses into children, so the future has to be boxed to be sized.
    fn build<'a>(
        &'a self,
        ctx: &'a QueryContext,
        expr: &'a SampleExpr,
        params: &'a Params,
        source: &'a SampleSource,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StepEvaluator>>> + Send + 'a>> {
        Box::pin(async move {
            let evaluator: Box<dyn StepEvaluator> = match expr {
                SampleExpr::RangeAggregation(range) => {
                    let iter = self.leaf_iterator(ctx, expr, params, source).await?;
                    Box::new(RangeVectorEvaluator::new(ctx.clone(), range, iter, params))
                }
                SampleExpr::VectorAggregation(agg) => {
                    let child = self.build(ctx, &agg.left, params, source).await?;
                    Box::new(VectorAggregationEvaluator::new(agg, child))
                }
                SampleExpr::LabelReplace(lr) => {
                    let child = self.build(ctx, &lr.left, params, source).await?;
                    Box::new(LabelReplaceEvaluator::new(lr, child)?)
                }
                SampleExpr::BinOp(bin) => {
                    // A side that folds to a constant skips vector matching.
                    match (bin.lhs.fold_literal(), bin.rhs.fold_literal()) {
                        (Some(_), Some(_)) => {
                            return Err(QueryError::InvalidQuery(format!(
                                "unexpected scalar expression {expr} where a vector is required"
                            )));
                        }
                        (Some(scalar), None) => {
                            let child = self.build(ctx, &bin.rhs, params, source).await?;
                            Box::new(LiteralEvaluator::new(
                                bin.op,
                                bin.opts.return_bool,
                                scalar,
                                true,
                                child,
                            ))
                        }
                        (None, Some(scalar)) => {
                            let child = self.build(ctx, &bin.lhs, params, source).await?;
                            Box::new(LiteralEvaluator::new(
                                bin.op,
                                bin.opts.return_bool,
                                scalar,
                                false,
                                child,
                            ))
                        }
                        (None, None) => {
                            let lhs = self.build(ctx, &bin.lhs, params, source).await?;
                            let rhs = self.build(ctx, &bin.rhs, params, source).await?;
                            Box::new(BinOpEvaluator::new(bin.op, bin.opts.clone(), lhs, rhs))
                        }
                    }
                }
                SampleExpr::Vector(value) => Box::new(VectorEvaluator::new(*value, params)),
                SampleExpr::Literal(value) => {
                    return Err(QueryError::InvalidQuery(format!(
                        "unexpected literal {value} where a vector is required"
                    )));
                }
            };
            Ok(evaluator)
        })
    }
}

#[async_trait]
impl EvaluatorFactory for DefaultEvaluatorFactory {
    async fn sample_evaluator(
        &self,
        ctx: &QueryContext,
        expr: &SampleExpr,
        params: &Params,
    ) -> Result<Box<dyn StepEvaluator>> {
        self.build(ctx, expr, params, &SampleSource::Querier).await
    }

    /// Issues a single selection covering all variants and routes its samples by the
    /// `__variant__` label.
    ///
    /// The selection is drained into one buffer per variant before any step
    /// runs, so memory grows with the samples of the whole query span rather
    /// than with a single window. This keeps the store to one round trip and
    /// lets each variant slide its windows independently.
    #[tracing::instrument(level = "debug", skip_all, fields(variants = expr.variants.len()))]
    async fn variants_evaluator(
        &self,
        ctx: &QueryContext,
        expr: &VariantsExpr,
        params: &Params,
    ) -> Result<Box<dyn StepEvaluator>> {
        let ranges = expr.log_ranges();
        let start = ranges
            .iter()
            .map(|r| params.start() - r.interval - r.offset)
            .min()
            .unwrap_or(params.start());
        let end = ranges
            .iter()
            .map(|r| params.end() - r.offset)
            .max()
            .unwrap_or(params.end());
        let select = SelectSampleParams {
            expr: Expr::Variants(expr.clone()),
            start,
            end,
            shards: params.shards().to_vec(),
        };

        let cancel = ctx.cancellation_token();
        let iter = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            it = self.querier.select_samples(ctx, select) => it,
        }?;
        let per_variant = variants::split_by_variant(iter, expr.variants.len())?;

        let sources: Vec<SampleSource> =
            per_variant.into_iter().map(SampleSource::Buffered).collect();
        let built = join_all(
            expr.variants
                .iter()
                .zip(&sources)
                .map(|(variant, source)| self.build(ctx, variant, params, source)),
        )
        .await;

        let mut children = Vec::with_capacity(built.len());
        let mut errors = Vec::new();
        for result in built {
            match result {
                Ok(child) => children.push(child),
                Err(err) => errors.push(err),
            }
        }
        if let Some(err) = QueryError::from_many(errors) {
            if let Err(close_err) = close_all(children.iter_mut()) {
                tracing::warn!(error = %close_err, "failed to close variant evaluators");
            }
            return Err(err);
        }
        Ok(Box::new(VariantsEvaluator::new(children)))
    }
}

/// Step timestamps the leaves of `params` are evaluated at.
pub(crate) fn step_timestamps(params: &Params) -> crate::timestamp::StepTimestamps {
    Timestamp::steps(params.start(), params.end(), params.eval_step())
}
