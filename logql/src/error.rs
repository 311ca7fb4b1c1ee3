//! Error types for query evaluation.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::syntax::format_duration;

/// Errors surfaced by the engine to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The query would return more distinct series than allowed.
    SeriesLimit { max: usize },
    /// A range selector spans more than the configured maximum.
    IntervalLimit { interval: Duration, limit: Duration },
    /// Multi-variant queries are turned off for this instance.
    VariantsDisabled,
    /// Two right-hand series share a signature in a one-to-one match.
    ManyToOneMatch,
    /// A group_left/group_right match produced two outputs with the same labels.
    NonUniqueGrouping,
    /// The one side of a grouped match carries a label that disagrees with the many side.
    LabelConflict(String),
    /// A vector ended up with two samples sharing a label set.
    DuplicateLabelSet(String),
    /// Failure reported by the querier or one of its iterators.
    Querier(String),
    /// The query did not finish within the configured timeout.
    Timeout,
    /// The caller cancelled the query.
    Cancelled,
    /// The expression cannot be evaluated as given.
    InvalidQuery(String),
    /// Broken invariant inside the engine.
    Internal(String),
    /// Several children failed. Duplicates are retained.
    Multi(Vec<QueryError>),
}

impl QueryError {
    /// Whether the error stems from a query limit.
    pub fn is_limit(&self) -> bool {
        matches!(self, QueryError::SeriesLimit { .. })
    }

    /// Whether the error stems from the range interval limit.
    pub fn is_interval_limit(&self) -> bool {
        matches!(self, QueryError::IntervalLimit { .. })
    }

    /// Folds a list of child errors into a single error.
    ///
    /// Returns `None` for an empty list, the sole error for a single entry,
    /// and `Multi` otherwise.
    pub fn from_many(mut errors: Vec<QueryError>) -> Option<QueryError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(QueryError::Multi(errors)),
        }
    }
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::SeriesLimit { max } => {
                write!(f, "maximum of series ({max}) reached for a single query")
            }
            QueryError::IntervalLimit { interval, limit } => write!(
                f,
                "[interval] value exceeds limit: [{}] > [{}]",
                format_duration(*interval),
                format_duration(*limit)
            ),
            QueryError::VariantsDisabled => {
                write!(f, "multi variant queries are disabled for this instance")
            }
            QueryError::ManyToOneMatch => write!(
                f,
                "multiple matches for labels: many-to-one matching must be explicit (group_left/group_right)"
            ),
            QueryError::NonUniqueGrouping => write!(
                f,
                "multiple matches for labels: grouping labels must ensure unique matches"
            ),
            QueryError::LabelConflict(name) => write!(
                f,
                "conflicting values for label {name} on both sides of a grouped match"
            ),
            QueryError::DuplicateLabelSet(labels) => {
                write!(f, "vector cannot contain metrics with the same labelset: {labels}")
            }
            QueryError::Querier(err) => write!(f, "{err}"),
            QueryError::Timeout => write!(f, "query timed out"),
            QueryError::Cancelled => write!(f, "context canceled"),
            QueryError::InvalidQuery(err) => write!(f, "invalid query: {err}"),
            QueryError::Internal(err) => write!(f, "LogQL internal error: {err}"),
            QueryError::Multi(errors) => {
                write!(f, "{} errors: ", errors.len())?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for QueryError {}

pub type Result<T> = std::result::Result<T, QueryError>;
