use std::collections::{BTreeMap, VecDeque};

use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::functions::{RangeFunction, range_function};
use crate::iter::SampleIterator;
use crate::labels::Labels;
use crate::model::{Point, Sample, Vector};
use crate::params::Params;
use crate::syntax::{Grouping, RangeAggregationExpr};
use crate::timestamp::StepTimestamps;

use super::{StepEvaluator, StepResult, step_timestamps};

/// Slides a `(t - offset - range, t - offset]` window over a timestamp-ordered
/// sample iterator and reduces every series in the window to one value.
///
/// The window keeps the points of each series (or of each group, when the
/// aggregation carries a grouping) in arrival order. Moving to the next step
/// evicts points that fell out of the left edge and loads samples up to the
/// new right edge, so every sample is read from the iterator once.
pub struct RangeVectorEvaluator {
    ctx: QueryContext,
    iter: Box<dyn SampleIterator>,
    steps: StepTimestamps,
    range_ms: i64,
    offset_ms: i64,
    /// `None` for absent_over_time.
    function: Option<Box<dyn RangeFunction>>,
    grouping: Option<Grouping>,
    absent_labels: Labels,
    windows: BTreeMap<Labels, VecDeque<Point>>,
    peeked: Option<Sample>,
    exhausted: bool,
    err: Option<QueryError>,
    done: bool,
}

impl RangeVectorEvaluator {
    pub fn new(
        ctx: QueryContext,
        expr: &RangeAggregationExpr,
        iter: Box<dyn SampleIterator>,
        params: &Params,
    ) -> Self {
        let range = expr.left.interval;
        Self {
            ctx,
            iter,
            steps: step_timestamps(params),
            range_ms: range.as_millis() as i64,
            offset_ms: expr.left.offset.as_millis() as i64,
            function: range_function(expr.op, range, expr.left.unwrap.is_some(), expr.param),
            grouping: expr.grouping.clone(),
            absent_labels: expr.left.selector.static_labels(),
            windows: BTreeMap::new(),
            peeked: None,
            exhausted: false,
            err: None,
            done: false,
        }
    }

    fn advance_window(&mut self, window_start: i64, window_end: i64) -> u64 {
        for points in self.windows.values_mut() {
            while points.front().is_some_and(|p| p.timestamp_ms <= window_start) {
                points.pop_front();
            }
        }
        self.windows.retain(|_, points| !points.is_empty());

        let mut loaded = 0;
        loop {
            let sample = match self.peeked.take() {
                Some(s) => s,
                None if self.exhausted => break,
                None => match self.iter.next() {
                    Some(s) => s,
                    None => {
                        self.exhausted = true;
                        break;
                    }
                },
            };
            if sample.timestamp_ms > window_end {
                self.peeked = Some(sample);
                break;
            }
            if sample.timestamp_ms <= window_start {
                continue;
            }
            loaded += 1;
            let point = sample.point();
            let key = match &self.grouping {
                Some(grouping) => grouping.apply(&sample.labels),
                None => sample.labels,
            };
            self.windows.entry(key).or_default().push_back(point);
        }
        loaded
    }

    fn reduce(&mut self, ts: i64) -> Vector {
        let Some(function) = &self.function else {
            // absent_over_time
            return if self.windows.is_empty() {
                vec![Sample::new(self.absent_labels.clone(), ts, 1.0)]
            } else {
                Vec::new()
            };
        };
        self.windows
            .iter_mut()
            .map(|(labels, points)| {
                let value = function.apply(points.make_contiguous());
                Sample::new(labels.clone(), ts, value)
            })
            .collect()
    }
}

impl StepEvaluator for RangeVectorEvaluator {
    fn next(&mut self) -> Option<(i64, StepResult)> {
        if self.done {
            return None;
        }
        let Some(ts) = self.steps.next() else {
            self.done = true;
            return None;
        };
        let ts = ts.as_millis();
        let window_end = ts - self.offset_ms;
        let window_start = window_end - self.range_ms;

        let loaded = self.advance_window(window_start, window_end);
        if let Some(err) = self.iter.error() {
            self.err = Some(err);
            self.done = true;
            return None;
        }
        self.ctx.record(|s| s.samples_processed += loaded);

        Some((ts, StepResult::Samples(self.reduce(ts))))
    }

    fn error(&self) -> Option<QueryError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.done = true;
        self.iter.close()
    }
}
