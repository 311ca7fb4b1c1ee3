use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Evaluation timestamp in milliseconds since the Unix epoch.
///
/// Log entries carry their own wall-clock time, but every step of a metric
/// query is addressed at millisecond precision, so this is the unit the
/// evaluators, the joiner and the result model agree on. Negative values are
/// valid and arithmetic never consults the OS clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns None if the timestamp is outside SystemTime's representable range.
    pub fn to_system_time(self) -> Option<SystemTime> {
        if self.0 >= 0 {
            UNIX_EPOCH.checked_add(Duration::from_millis(self.0 as u64))
        } else {
            let abs = self.0.checked_abs()? as u64;
            UNIX_EPOCH.checked_sub(Duration::from_millis(abs))
        }
    }

    /// Step timestamps from `start` to `end` inclusive.
    ///
    /// A zero step yields the single timestamp `end`, which is how instant
    /// queries are driven.
    pub fn steps(start: Timestamp, end: Timestamp, step: Duration) -> StepTimestamps {
        let step_ms = step.as_millis() as i64;
        if step_ms == 0 {
            StepTimestamps {
                next: Some(end.0),
                end: end.0,
                step_ms: 1,
            }
        } else {
            StepTimestamps {
                next: Some(start.0),
                end: end.0,
                step_ms,
            }
        }
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp(d.as_millis() as i64),
            Err(e) => Timestamp(-(e.duration().as_millis() as i64)),
        }
    }
}

/// Iterator over the step timestamps of a query.
#[derive(Debug, Clone)]
pub struct StepTimestamps {
    next: Option<i64>,
    end: i64,
    step_ms: i64,
}

impl Iterator for StepTimestamps {
    type Item = Timestamp;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.filter(|t| *t <= self.end)?;
        self.next = current.checked_add(self.step_ms);
        Some(Timestamp(current))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0 + rhs.as_millis() as i64)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0 - rhs.as_millis() as i64)
    }
}

/// Difference in milliseconds.
impl Sub<Timestamp> for Timestamp {
    type Output = i64;

    fn sub(self, rhs: Timestamp) -> Self::Output {
        self.0 - rhs.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
