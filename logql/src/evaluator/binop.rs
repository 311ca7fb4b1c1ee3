use crate::error::{QueryError, Result};
use crate::syntax::{BinOpOptions, BinaryOp};

use super::{StepEvaluator, StepResult, close_all, next_vector, vector_binop};

/// Vector/vector binary operation.
///
/// Children are always pulled left then right, even when the left side is
/// already exhausted, so that both sides' errors are observed and reported
/// together.
pub struct BinOpEvaluator {
    op: BinaryOp,
    opts: BinOpOptions,
    children: [Box<dyn StepEvaluator>; 2],
    err: Option<QueryError>,
    done: bool,
}

impl BinOpEvaluator {
    pub fn new(
        op: BinaryOp,
        opts: BinOpOptions,
        lhs: Box<dyn StepEvaluator>,
        rhs: Box<dyn StepEvaluator>,
    ) -> Self {
        Self {
            op,
            opts,
            children: [lhs, rhs],
            err: None,
            done: false,
        }
    }

    fn fail(&mut self, err: QueryError) -> Option<(i64, StepResult)> {
        self.err = Some(err);
        self.done = true;
        None
    }
}

impl StepEvaluator for BinOpEvaluator {
    fn next(&mut self) -> Option<(i64, StepResult)> {
        if self.done {
            return None;
        }
        let [lhs, rhs] = &mut self.children;
        let left = next_vector(lhs.as_mut());
        let right = next_vector(rhs.as_mut());

        match (left, right) {
            (Ok(Some((ts, lhs))), Ok(Some((_, rhs)))) => {
                match vector_binop(self.op, &self.opts, lhs, rhs) {
                    Ok(out) => Some((ts, StepResult::Samples(out))),
                    Err(err) => self.fail(err),
                }
            }
            (Err(err), _) | (_, Err(err)) => self.fail(err),
            _ => {
                self.done = true;
                let errors: Vec<QueryError> =
                    self.children.iter().filter_map(|c| c.error()).collect();
                self.err = QueryError::from_many(errors);
                None
            }
        }
    }

    fn error(&self) -> Option<QueryError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.done = true;
        close_all(self.children.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::test_utils::{MockStepEvaluator, drain, sample};

    fn mock(steps: Vec<(i64, Vec<(&str, f64)>)>) -> MockStepEvaluator {
        MockStepEvaluator::new(
            steps
                .into_iter()
                .map(|(ts, samples)| {
                    (
                        ts,
                        samples
                            .into_iter()
                            .map(|(app, v)| sample(&[("app", app)], ts, v))
                            .collect(),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn should_match_children_step_by_step() {
        // given:
        let lhs = mock(vec![(0, vec![("a", 1.0)]), (60_000, vec![("a", 2.0)])]);
        let rhs = mock(vec![(0, vec![("a", 10.0)]), (60_000, vec![("a", 20.0)])]);
        let mut ev = BinOpEvaluator::new(
            BinaryOp::Add,
            BinOpOptions::default(),
            Box::new(lhs),
            Box::new(rhs),
        );

        // when:
        let steps = drain(&mut ev);

        // then:
        assert_eq!(
            steps,
            vec![
                (0, vec![sample(&[("app", "a")], 0, 11.0)]),
                (60_000, vec![sample(&[("app", "a")], 60_000, 22.0)]),
            ]
        );
        assert_eq!(ev.error(), None);
    }

    #[test]
    fn should_aggregate_errors_of_both_children_without_dedup() {
        // given:
        let mock_err = QueryError::Querier("mock error".to_string());
        let lhs = mock(vec![]).failing(mock_err.clone());
        let rhs = mock(vec![]).failing(mock_err.clone());
        let mut ev = BinOpEvaluator::new(
            BinaryOp::Div,
            BinOpOptions::default(),
            Box::new(lhs),
            Box::new(rhs),
        );

        // when:
        let next = ev.next();

        // then:
        assert!(next.is_none());
        assert_eq!(
            ev.error(),
            Some(QueryError::Multi(vec![mock_err.clone(), mock_err]))
        );
        assert!(ev.next().is_none());
    }

    #[test]
    fn should_report_single_failing_child() {
        let mock_err = QueryError::Querier("mock error".to_string());
        let lhs = mock(vec![(0, vec![("a", 1.0)])]);
        let rhs = mock(vec![]).failing(mock_err.clone());
        let mut ev = BinOpEvaluator::new(
            BinaryOp::Add,
            BinOpOptions::default(),
            Box::new(lhs),
            Box::new(rhs),
        );

        assert!(ev.next().is_none());
        assert_eq!(ev.error(), Some(mock_err));
    }

    #[test]
    fn should_stop_on_matching_error() {
        let lhs = mock(vec![(0, vec![("a", 1.0)])]);
        let rhs = MockStepEvaluator::new(vec![(
            0,
            vec![
                sample(&[("app", "a"), ("pod", "1")], 0, 1.0),
                sample(&[("app", "a"), ("pod", "2")], 0, 1.0),
            ],
        )]);
        let opts = BinOpOptions {
            return_bool: false,
            vector_matching: Some(crate::syntax::VectorMatching::on(["app"])),
        };
        let mut ev = BinOpEvaluator::new(BinaryOp::Add, opts, Box::new(lhs), Box::new(rhs));

        assert!(ev.next().is_none());
        assert_eq!(ev.error(), Some(QueryError::ManyToOneMatch));
    }

    #[test]
    fn should_close_both_children() {
        let mut ev = BinOpEvaluator::new(
            BinaryOp::Add,
            BinOpOptions::default(),
            Box::new(mock(vec![])),
            Box::new(mock(vec![])),
        );

        assert!(ev.close().is_ok());
        assert!(ev.next().is_none());
    }
}
