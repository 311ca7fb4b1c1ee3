use crate::error::{QueryError, Result};
use crate::labels::Labels;
use crate::model::Sample;
use crate::params::Params;
use crate::syntax::BinaryOp;
use crate::timestamp::StepTimestamps;

use super::{StepEvaluator, StepResult, next_vector, step_timestamps};

/// Applies a binary operator between every sample of a child and a scalar.
///
/// No vector matching happens; the child's label sets pass through. Without
/// `bool`, comparisons filter and keep the vector sample's value.
pub struct LiteralEvaluator {
    op: BinaryOp,
    return_bool: bool,
    scalar: f64,
    /// The scalar is the left operand.
    inverted: bool,
    child: Box<dyn StepEvaluator>,
    err: Option<QueryError>,
    done: bool,
}

impl LiteralEvaluator {
    pub fn new(
        op: BinaryOp,
        return_bool: bool,
        scalar: f64,
        inverted: bool,
        child: Box<dyn StepEvaluator>,
    ) -> Self {
        Self {
            op,
            return_bool,
            scalar,
            inverted,
            child,
            err: None,
            done: false,
        }
    }

    fn apply(&self, mut sample: Sample) -> Option<Sample> {
        let (lhs, rhs) = if self.inverted {
            (self.scalar, sample.value)
        } else {
            (sample.value, self.scalar)
        };
        let (value, keep) = self.op.eval(lhs, rhs);
        if self.op.is_comparison() {
            if self.return_bool {
                sample.value = if keep { 1.0 } else { 0.0 };
            } else if !keep {
                return None;
            }
        } else {
            sample.value = value;
        }
        Some(sample)
    }
}

impl StepEvaluator for LiteralEvaluator {
    fn next(&mut self) -> Option<(i64, StepResult)> {
        if self.done {
            return None;
        }
        match next_vector(self.child.as_mut()) {
            Ok(Some((ts, vector))) => {
                let out = vector.into_iter().filter_map(|s| self.apply(s)).collect();
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

/// `vector(s)`: one label-less sample carrying `s` at every step.
pub struct VectorEvaluator {
    value: f64,
    steps: StepTimestamps,
}

impl VectorEvaluator {
    pub fn new(value: f64, params: &Params) -> Self {
        Self {
            value,
            steps: step_timestamps(params),
        }
    }
}

impl StepEvaluator for VectorEvaluator {
    fn next(&mut self) -> Option<(i64, StepResult)> {
        let ts = self.steps.next()?.as_millis();
        Some((
            ts,
            StepResult::Samples(vec![Sample::new(Labels::empty(), ts, self.value)]),
        ))
    }

    fn error(&self) -> Option<QueryError> {
        None
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
