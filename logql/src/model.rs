//! Values produced by query evaluation.
//!
//! Metric queries yield a scalar, an instant [`Vector`] or a range
//! [`Matrix`]; log queries yield [`Stream`]s. Timestamps are milliseconds
//! since the Unix epoch throughout.

use crate::labels::Labels;

/// A single (timestamp, value) pair inside a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub timestamp_ms: i64,
    /// May be NaN or ±Inf.
    pub value: f64,
}

impl Point {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// One labelled value at one timestamp.
///
/// This is both the element of an instant vector and the unit the querier
/// hands back from `select_samples`, where `value` has already been extracted
/// from the log line (1 per line, the line size in bytes, or the unwrapped
/// label value, depending on the range function).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Labels,
    pub timestamp_ms: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(labels: Labels, timestamp_ms: i64, value: f64) -> Self {
        Self {
            labels,
            timestamp_ms,
            value,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.timestamp_ms, self.value)
    }
}

/// Instant vector. No two samples share a label set.
pub type Vector = Vec<Sample>;

/// A time series of a range query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: Labels,
    pub points: Vec<Point>,
}

/// Range query result, ordered by label set.
pub type Matrix = Vec<Series>;

/// A log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp_ms: i64,
    pub line: String,
}

impl Entry {
    pub fn new(timestamp_ms: i64, line: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            line: line.into(),
        }
    }
}

/// Log lines sharing one label set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub labels: Labels,
    pub entries: Vec<Entry>,
}

/// Result payload of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Scalar(Point),
    Vector(Vector),
    Matrix(Matrix),
    Streams(Vec<Stream>),
}

impl QueryValue {
    pub fn into_vector(self) -> Option<Vector> {
        match self {
            QueryValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_matrix(self) -> Option<Matrix> {
        match self {
            QueryValue::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_streams(self) -> Option<Vec<Stream>> {
        match self {
            QueryValue::Streams(s) => Some(s),
            _ => None,
        }
    }

    /// Number of distinct series (or streams) in the result.
    pub fn series_count(&self) -> usize {
        match self {
            QueryValue::Scalar(_) => 0,
            QueryValue::Vector(v) => v.len(),
            QueryValue::Matrix(m) => m.len(),
            QueryValue::Streams(s) => s.len(),
        }
    }
}

/// Sorts a vector by the canonical ordering of its label sets.
pub fn sort_by_labels(vector: &mut Vector) {
    vector.sort_by(|a, b| a.labels.cmp(&b.labels));
}
