use crate::error::{QueryError, Result};
use crate::iter::SampleIterator;
use crate::labels::VARIANT_LABEL;
use crate::model::Sample;

use super::{StepEvaluator, StepResult, close_all, next_vector};

/// Buffers the samples of a variants selection, one list per variant.
///
/// Every sample must carry a `__variant__` label holding the index of a
/// declared variant; the label is stripped before the sample is handed to the
/// variant's own evaluator.
pub(crate) fn split_by_variant(
    mut iter: Box<dyn SampleIterator>,
    variants: usize,
) -> Result<Vec<Vec<Sample>>> {
    let mut out = vec![Vec::new(); variants];
    let result = drain_variants(iter.as_mut(), &mut out);
    let closed = iter.close();
    result?;
    closed?;
    Ok(out)
}

fn drain_variants(iter: &mut dyn SampleIterator, out: &mut [Vec<Sample>]) -> Result<()> {
    while let Some(mut sample) = iter.next() {
        let index = sample
            .labels
            .get(VARIANT_LABEL)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|i| *i < out.len())
            .ok_or_else(|| {
                QueryError::Internal(format!(
                    "sample {} does not belong to any of {} variants",
                    sample.labels,
                    out.len()
                ))
            })?;
        sample.labels = sample.labels.without(VARIANT_LABEL);
        out[index].push(sample);
    }
    iter.error().map_or(Ok(()), Err)
}

/// Steps all variant evaluators in lockstep and tags their output with the
/// index of the variant that produced it.
///
/// The evaluator ends as soon as one variant is exhausted or fails.
pub struct VariantsEvaluator {
    children: Vec<Box<dyn StepEvaluator>>,
    err: Option<QueryError>,
    done: bool,
}

impl VariantsEvaluator {
    pub fn new(children: Vec<Box<dyn StepEvaluator>>) -> Self {
        Self {
            children,
            err: None,
            done: false,
        }
    }
}

impl StepEvaluator for VariantsEvaluator {
    fn next(&mut self) -> Option<(i64, StepResult)> {
        if self.done || self.children.is_empty() {
            self.done = true;
            return None;
        }
        let mut step = None;
        let mut out = Vec::new();
        let mut exhausted = false;
        for (index, child) in self.children.iter_mut().enumerate() {
            match next_vector(child.as_mut()) {
                Ok(Some((ts, vector))) => {
                    step.get_or_insert(ts);
                    let variant = index.to_string();
                    out.extend(vector.into_iter().map(|mut s| {
                        s.labels = s.labels.with(VARIANT_LABEL, variant.as_str());
                        s
                    }));
                }
                Ok(None) => exhausted = true,
                Err(err) => {
                    self.err = Some(err);
                    self.done = true;
                    return None;
                }
            }
        }
        match step {
            Some(ts) if !exhausted => Some((ts, StepResult::Samples(out))),
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
    use crate::iter::{ErrorSampleIterator, MergeSampleIterator, VecSampleIterator};

    #[test]
    fn should_split_samples_by_variant_label() {
        // given:
        let iter = VecSampleIterator::new(vec![
            sample(&[("__variant__", "1"), ("app", "foo")], 1000, 10.0),
            sample(&[("__variant__", "0"), ("app", "foo")], 1000, 1.0),
            sample(&[("__variant__", "0"), ("app", "bar")], 2000, 1.0),
        ]);

        // when:
        let split = split_by_variant(Box::new(iter), 2).unwrap();

        // then:
        assert_eq!(
            split,
            vec![
                vec![
                    sample(&[("app", "foo")], 1000, 1.0),
                    sample(&[("app", "bar")], 2000, 1.0)
                ],
                vec![sample(&[("app", "foo")], 1000, 10.0)],
            ]
        );
    }

    #[test]
    fn should_reject_samples_of_unknown_variant() {
        let iter = VecSampleIterator::new(vec![sample(&[("__variant__", "2")], 1000, 1.0)]);

        let result = split_by_variant(Box::new(iter), 2);

        assert!(matches!(result, Err(QueryError::Internal(_))));
    }

    #[test]
    fn should_reject_samples_without_variant_label() {
        let iter = VecSampleIterator::new(vec![sample(&[("app", "foo")], 1000, 1.0)]);

        let result = split_by_variant(Box::new(iter), 1);

        assert!(matches!(result, Err(QueryError::Internal(_))));
    }

    #[test]
    fn should_surface_iterator_error_when_splitting() {
        let mock_err = QueryError::Querier("mock error".to_string());
        let iter = MergeSampleIterator::new(vec![
            Box::new(VecSampleIterator::new(vec![sample(
                &[("__variant__", "0")],
                1000,
                1.0,
            )])),
            Box::new(ErrorSampleIterator(mock_err.clone())),
        ]);

        let result = split_by_variant(Box::new(iter), 1);

        assert_eq!(result, Err(mock_err));
    }

    #[test]
    fn should_tag_each_variant_output() {
        // given:
        let count = MockStepEvaluator::new(vec![
            (0, vec![sample(&[("app", "foo")], 0, 3.0)]),
            (60_000, vec![sample(&[("app", "foo")], 60_000, 4.0)]),
        ]);
        let bytes = MockStepEvaluator::new(vec![
            (0, vec![sample(&[("app", "foo")], 0, 300.0)]),
            (60_000, vec![]),
        ]);
        let mut ev = VariantsEvaluator::new(vec![Box::new(count), Box::new(bytes)]);

        // when:
        let steps = drain(&mut ev);

        // then:
        assert_eq!(
            steps,
            vec![
                (
                    0,
                    vec![
                        sample(&[("__variant__", "0"), ("app", "foo")], 0, 3.0),
                        sample(&[("__variant__", "1"), ("app", "foo")], 0, 300.0),
                    ]
                ),
                (
                    60_000,
                    vec![sample(&[("__variant__", "0"), ("app", "foo")], 60_000, 4.0)]
                ),
            ]
        );
        assert_eq!(ev.error(), None);
    }

    #[test]
    fn should_end_when_any_variant_fails() {
        // given:
        let mock_err = QueryError::Querier("mock error".to_string());
        let ok = MockStepEvaluator::new(vec![
            (0, vec![sample(&[("app", "foo")], 0, 1.0)]),
            (60_000, vec![sample(&[("app", "foo")], 60_000, 1.0)]),
        ]);
        let failing =
            MockStepEvaluator::new(vec![(0, vec![])]).failing(mock_err.clone());
        let mut ev = VariantsEvaluator::new(vec![Box::new(ok), Box::new(failing)]);

        // when:
        let steps = drain(&mut ev);

        // then:
        assert_eq!(steps.len(), 1);
        assert_eq!(ev.error(), Some(mock_err));
        assert!(ev.next().is_none());
    }

    #[test]
    fn should_close_all_variants() {
        let mut ev = VariantsEvaluator::new(vec![
            Box::new(MockStepEvaluator::new(vec![])),
            Box::new(MockStepEvaluator::new(vec![])),
        ]);

        assert!(ev.close().is_ok());
        assert!(ev.next().is_none());
    }
}
