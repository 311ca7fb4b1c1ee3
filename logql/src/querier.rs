use async_trait::async_trait;

use crate::context::QueryContext;
use crate::error::Result;
use crate::iter::{EntryIterator, SampleIterator};
use crate::params::Direction;
use crate::syntax::{Expr, LogSelectorExpr};
use crate::timestamp::Timestamp;

/// Request for raw log lines.
#[derive(Debug, Clone)]
pub struct SelectLogParams {
    pub selector: LogSelectorExpr,
    pub start: Timestamp,
    pub end: Timestamp,
    pub direction: Direction,
    pub limit: u32,
    pub shards: Vec<String>,
}

/// Request for samples extracted from log lines.
///
/// `expr` is either the range aggregation of one leaf or a whole
/// `variants(...) of (...)` expression. In the latter case every returned
/// sample must carry the [`VARIANT_LABEL`](crate::labels::VARIANT_LABEL) of
/// the variant it was extracted for.
#[derive(Debug, Clone)]
pub struct SelectSampleParams {
    pub expr: Expr,
    pub start: Timestamp,
    pub end: Timestamp,
    pub shards: Vec<String>,
}

impl SelectSampleParams {
    pub fn selector(&self) -> String {
        self.expr.to_string()
    }
}

/// Storage side of the engine: resolves selectors into iterators.
///
/// Implementations may perform I/O and should return promptly once the
/// context's cancellation token fires.
#[async_trait]
pub trait Querier: Send + Sync {
    async fn select_logs(
        &self,
        ctx: &QueryContext,
        params: SelectLogParams,
    ) -> Result<Box<dyn EntryIterator>>;

    async fn select_samples(
        &self,
        ctx: &QueryContext,
        params: SelectSampleParams,
    ) -> Result<Box<dyn SampleIterator>>;
}
