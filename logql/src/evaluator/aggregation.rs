use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use regex::Regex;

use crate::error::{QueryError, Result};
use crate::functions::{avg_kahan, max_value, min_value, sum_kahan, variance_kahan};
use crate::labels::Labels;
use crate::model::{Sample, Vector};
use crate::syntax::{Grouping, LabelReplaceExpr, VectorAggregationExpr, VectorOp};

use super::{StepEvaluator, StepResult, next_vector};

/// Orders by value with NaN last, then by label set.
fn by_value(a: &Sample, b: &Sample, descending: bool) -> Ordering {
    let by_value = match (a.value.is_nan(), b.value.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if descending => b.value.total_cmp(&a.value),
        (false, false) => a.value.total_cmp(&b.value),
    };
    by_value.then_with(|| a.labels.cmp(&b.labels))
}

/// Reduces one instant vector.
///
/// Without a grouping, the reducers collapse the whole vector into one
/// label-less sample; topk/bottomk then select over the whole vector.
pub(crate) fn aggregate(
    op: VectorOp,
    grouping: Option<&Grouping>,
    k: Option<usize>,
    ts: i64,
    vector: Vector,
) -> Vector {
    match op {
        VectorOp::Sort => {
            let mut out = vector;
            out.sort_by(|a, b| by_value(a, b, false));
            out
        }
        VectorOp::SortDesc => {
            let mut out = vector;
            out.sort_by(|a, b| by_value(a, b, true));
            out
        }
        VectorOp::Topk | VectorOp::Bottomk => {
            let k = k.unwrap_or(0);
            let descending = op == VectorOp::Topk;
            let mut groups: BTreeMap<Labels, Vec<Sample>> = BTreeMap::new();
            for sample in vector {
                let key = grouping.map_or_else(Labels::empty, |g| g.apply(&sample.labels));
                groups.entry(key).or_default().push(sample);
            }
            groups
                .into_values()
                .flat_map(|mut samples| {
                    samples.sort_by(|a, b| by_value(a, b, descending));
                    samples.truncate(k);
                    samples
                })
                .collect()
        }
        _ => {
            let mut groups: BTreeMap<Labels, Vec<f64>> = BTreeMap::new();
            for sample in vector {
                let key = grouping.map_or_else(Labels::empty, |g| g.apply(&sample.labels));
                groups.entry(key).or_default().push(sample.value);
            }
            groups
                .into_iter()
                .map(|(labels, values)| {
                    let value = match op {
                        VectorOp::Sum => sum_kahan(&values),
                        VectorOp::Avg => avg_kahan(&values),
                        VectorOp::Min => min_value(&values),
                        VectorOp::Max => max_value(&values),
                        VectorOp::Count => values.len() as f64,
                        VectorOp::Stddev => variance_kahan(&values).sqrt(),
                        VectorOp::Stdvar => variance_kahan(&values),
                        VectorOp::Topk
                        | VectorOp::Bottomk
                        | VectorOp::Sort
                        | VectorOp::SortDesc => f64::NAN,
                    };
                    Sample::new(labels, ts, value)
                })
                .collect()
        }
    }
}

/// `sum by (...)`, `topk(k, ...)`, `sort(...)` and friends.
pub struct VectorAggregationEvaluator {
    op: VectorOp,
    grouping: Option<Grouping>,
    k: Option<usize>,
    child: Box<dyn StepEvaluator>,
    err: Option<QueryError>,
    done: bool,
}

impl VectorAggregationEvaluator {
    pub fn new(expr: &VectorAggregationExpr, child: Box<dyn StepEvaluator>) -> Self {
        Self {
            op: expr.op,
            grouping: expr.grouping.clone(),
            k: expr.param,
            child,
            err: None,
            done: false,
        }
    }
}

impl StepEvaluator for VectorAggregationEvaluator {
    fn next(&mut self) -> Option<(i64, StepResult)> {
        if self.done {
            return None;
        }
        match next_vector(self.child.as_mut()) {
            Ok(Some((ts, vector))) => {
                let out = aggregate(self.op, self.grouping.as_ref(), self.k, ts, vector);
                Some((ts, StepResult::Samples(out)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.err = Some(err);
                self.done = true;
                None
            }
        }
    }

    fn error(&self) -> Option<QueryError> {
        self.err.clone().or_else(|| self.child.error())
    }

    fn close(&mut self) -> Result<()> {
        self.done = true;
        self.child.close()
    }
}

/// `label_replace(v, dst, replacement, src, regex)`.
///
/// The regex is anchored on both ends. Series whose source label does not
/// match pass through unchanged; an empty expansion removes `dst`.
pub struct LabelReplaceEvaluator {
    dst: String,
    replacement: String,
    src: String,
    regex: Regex,
    child: Box<dyn StepEvaluator>,
    err: Option<QueryError>,
    done: bool,
}

impl LabelReplaceEvaluator {
    pub fn new(expr: &LabelReplaceExpr, child: Box<dyn StepEvaluator>) -> Result<Self> {
        let regex = Regex::new(&format!("^(?s:{})$", expr.regex)).map_err(|e| {
            QueryError::InvalidQuery(format!(
                "invalid regular expression in label_replace(): {e}"
            ))
        })?;
        Ok(Self {
            dst: expr.dst.clone(),
            replacement: expr.replacement.clone(),
            src: expr.src.clone(),
            regex,
            child,
            err: None,
            done: false,
        })
    }

    fn replace(&self, vector: Vector) -> Result<Vector> {
        let mut seen = HashSet::with_capacity(vector.len());
        let mut out = Vec::with_capacity(vector.len());
        for mut sample in vector {
            let src = sample.labels.get(&self.src).unwrap_or("");
            if let Some(captures) = self.regex.captures(src) {
                let mut value = String::new();
                captures.expand(&self.replacement, &mut value);
                sample.labels = sample.labels.with(self.dst.as_str(), value);
            }
            if !seen.insert(sample.labels.clone()) {
                return Err(QueryError::DuplicateLabelSet(sample.labels.to_string()));
            }
            out.push(sample);
        }
        Ok(out)
    }
}

impl StepEvaluator for LabelReplaceEvaluator {
    fn next(&mut self) -> Option<(i64, StepResult)> {
        if self.done {
            return None;
        }
        let result = next_vector(self.child.as_mut())
            .and_then(|step| step.map(|(ts, v)| self.replace(v).map(|v| (ts, v))).transpose());
        match result {
            Ok(Some((ts, out))) => Some((ts, StepResult::Samples(out))),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.err = Some(err);
                self.done = true;
                None
            }
        }
    }

    fn error(&self) -> Option<QueryError> {
        self.err.clone().or_else(|| self.child.error())
    }

    fn close(&mut self) -> Result<()> {
        self.done = true;
        self.child.close()
    }
}
