//! OpenData LogQL - step evaluation engine for LogQL queries.
//!
//! The engine takes an already parsed query, builds a tree of pull-based step
//! evaluators over a [`Querier`] and joins their per-step output into an
//! instant vector, a matrix or a list of log streams.
//!
//! # Key Concepts
//!
//! - **Engine / Query**: entry point. [`Engine::query`] binds parameters,
//!   [`Query::exec`] runs them under the tenant's [`Limits`].
//! - **StepEvaluator**: one node of the evaluator tree, yielding one instant
//!   vector per step timestamp.
//! - **Querier**: the storage seam. It turns selectors into sample or entry
//!   iterators.
//! - **QueryContext**: request-scoped tags, warnings, statistics and
//!   cancellation.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use logql::{Engine, EngineConfig, NoLimits, Params, QueryContext};
//!
//! let engine = Engine::new(EngineConfig::default(), querier, Arc::new(NoLimits));
//! let result = engine
//!     .query(Params::instant(expr, Timestamp::from_secs(60)))
//!     .exec(&QueryContext::new())
//!     .await?;
//! for warning in &result.warnings {
//!     eprintln!("{warning}");
//! }
//! ```

mod config;
mod context;
mod engine;
mod error;
mod evaluator;
mod functions;
mod iter;
mod joiner;
mod labels;
mod model;
mod params;
mod querier;
pub mod syntax;
pub mod testing;
mod timestamp;

pub use config::{EngineConfig, Limits, LimitsConfig, NoLimits};
pub use context::{QueryContext, Statistics};
pub use engine::{Engine, Query, QueryResult};
pub use error::{QueryError, Result};
pub use evaluator::{
    CountMinSketchVector, DefaultEvaluatorFactory, EvaluatorFactory, QuantileSketchSample,
    StepEvaluator, StepResult,
};
pub use iter::{
    EntryIterator, ErrorEntryIterator, ErrorSampleIterator, MergeEntryIterator,
    MergeSampleIterator, SampleIterator, StreamIterator, VecSampleIterator,
};
pub use labels::{Label, LabelMatcher, Labels, LabelsBuilder, MatchType, VARIANT_LABEL};
pub use model::{Entry, Matrix, Point, QueryValue, Sample, Series, Stream, Vector};
pub use params::{Direction, Params};
pub use querier::{Querier, SelectLogParams, SelectSampleParams};
pub use timestamp::{StepTimestamps, Timestamp};
