use std::time::Duration;

use crate::syntax::Expr;
use crate::timestamp::Timestamp;

/// Order in which log entries are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Forward,
    #[default]
    Backward,
}

/// Immutable description of one query execution.
#[derive(Debug, Clone)]
pub struct Params {
    expr: Expr,
    start: Timestamp,
    end: Timestamp,
    step: Duration,
    interval: Duration,
    direction: Direction,
    limit: u32,
    shards: Vec<String>,
}

impl Params {
    pub fn new(
        expr: Expr,
        start: Timestamp,
        end: Timestamp,
        step: Duration,
        interval: Duration,
        direction: Direction,
        limit: u32,
    ) -> Self {
        Self {
            expr,
            start,
            end,
            step,
            interval,
            direction,
            limit,
            shards: Vec::new(),
        }
    }

    /// An instant query evaluated at `ts`.
    pub fn instant(expr: Expr, ts: Timestamp) -> Self {
        Self::new(expr, ts, ts, Duration::ZERO, Duration::ZERO, Direction::Backward, 0)
    }

    /// A range query from `start` to `end` inclusive.
    pub fn range(expr: Expr, start: Timestamp, end: Timestamp, step: Duration) -> Self {
        Self::new(expr, start, end, step, Duration::ZERO, Direction::Backward, 0)
    }

    pub fn with_shards(mut self, shards: Vec<String>) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Canonical query text.
    pub fn query(&self) -> String {
        self.expr.to_string()
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Minimum spacing between returned log entries.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Maximum number of log entries returned.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    /// The step the evaluators advance by; zero for instant queries.
    pub fn eval_step(&self) -> Duration {
        if self.is_instant() {
            Duration::ZERO
        } else {
            self.step
        }
    }
}
