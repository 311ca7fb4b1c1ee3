//! Request-scoped side channel shared by every evaluator of one query.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{QueryError, Result};

const DRILLDOWN_SOURCE: &str = "grafana-lokiexplore-app";

/// Counters collected while a query runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub steps_evaluated: u64,
    pub samples_processed: u64,
    pub entries_returned: u64,
    pub series_returned: u64,
    pub exec_time: Duration,
}

#[derive(Debug, Default)]
struct Collectors {
    warnings: Mutex<Vec<String>>,
    stats: Mutex<Statistics>,
}

/// Warnings, statistics, caller tags and cancellation for a single query.
///
/// Clones share the same collectors, so an evaluator can keep its own handle
/// while the caller reads the warnings once the query is done. The collectors
/// are append-only and guarded so that variant evaluators may write to them
/// from different tasks.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    tags: Option<String>,
    collectors: Arc<Collectors>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the caller's query tags, e.g. `Source=grafana,Feature=patterns`.
    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sets the instant after which step evaluation stops with a timeout.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn tags(&self) -> Option<&str> {
        self.tags.as_deref()
    }

    /// Whether the request comes from the logs drilldown app, which prefers
    /// truncated results with a warning over a hard limit failure.
    pub fn is_drilldown(&self) -> bool {
        self.tags.as_deref().is_some_and(is_drilldown_tags)
    }

    /// Records a warning. Repeated warnings are kept once, in first-seen order.
    pub fn add_warning(&self, warning: impl Into<String>) {
        let warning = warning.into();
        let mut warnings = self.collectors.warnings.lock().unwrap_or_else(|e| e.into_inner());
        if !warnings.contains(&warning) {
            warnings.push(warning);
        }
    }

    pub fn warnings(&self) -> Vec<String> {
        self.collectors
            .warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn record(&self, f: impl FnOnce(&mut Statistics)) {
        let mut stats = self.collectors.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }

    pub fn statistics(&self) -> Statistics {
        self.collectors
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails once the query was cancelled or its deadline has passed.
    ///
    /// Evaluators step synchronously, so loops pulling many steps call this
    /// between them instead of relying on an await point.
    pub fn check_interrupted(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(QueryError::Timeout),
            _ => Ok(()),
        }
    }
}

fn is_drilldown_tags(tags: &str) -> bool {
    tags.split(',').any(|pair| {
        pair.split_once('=').is_some_and(|(key, value)| {
            key.trim().eq_ignore_ascii_case("source")
                && value.trim().eq_ignore_ascii_case(DRILLDOWN_SOURCE)
        })
    })
}
