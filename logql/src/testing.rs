//! In-memory [`Querier`] for tests and benchmarks.
//!
//! Samples are stored already extracted: the querier filters them by the
//! selector's matchers and the requested time range but does not run the
//! pipeline. Every request is recorded so tests can assert on the spans the
//! engine asked for.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::iter::{
    EntryIterator, ErrorEntryIterator, ErrorSampleIterator, MergeEntryIterator,
    MergeSampleIterator, SampleIterator, StreamIterator, VecSampleIterator,
};
use crate::labels::VARIANT_LABEL;
use crate::model::{Sample, Stream};
use crate::params::Direction;
use crate::querier::{Querier, SelectLogParams, SelectSampleParams};
use crate::syntax::{Expr, LogSelectorExpr, SampleExpr};

#[derive(Default)]
pub struct MemoryQuerier {
    samples: Vec<Sample>,
    streams: Vec<Stream>,
    delay: Option<Duration>,
    select_error: Option<QueryError>,
    iterator_error: Option<QueryError>,
    sample_requests: Mutex<Vec<SelectSampleParams>>,
    log_requests: Mutex<Vec<SelectLogParams>>,
}

impl MemoryQuerier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(mut self, samples: Vec<Sample>) -> Self {
        self.samples.extend(samples);
        self
    }

    pub fn with_streams(mut self, streams: Vec<Stream>) -> Self {
        self.streams.extend(streams);
        self
    }

    /// Sleeps before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails every request before an iterator is handed out.
    pub fn with_select_error(mut self, err: QueryError) -> Self {
        self.select_error = Some(err);
        self
    }

    /// Hands out iterators that fail once their data is drained.
    pub fn with_iterator_error(mut self, err: QueryError) -> Self {
        self.iterator_error = Some(err);
        self
    }

    pub fn sample_requests(&self) -> Vec<SelectSampleParams> {
        self.sample_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn log_requests(&self) -> Vec<SelectLogParams> {
        self.log_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn before_select(&self) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.select_error.clone().map_or(Ok(()), Err)
    }

    fn matching_samples(&self, selector: &LogSelectorExpr, params: &SelectSampleParams) -> Vec<Sample> {
        let start = params.start.as_millis();
        let end = params.end.as_millis();
        self.samples
            .iter()
            .filter(|s| s.timestamp_ms >= start && s.timestamp_ms <= end)
            .filter(|s| selector.matchers.iter().all(|m| m.matches(&s.labels)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Querier for MemoryQuerier {
    async fn select_logs(
        &self,
        _ctx: &QueryContext,
        params: SelectLogParams,
    ) -> Result<Box<dyn EntryIterator>> {
        self.log_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(params.clone());
        self.before_select().await?;

        let start = params.start.as_millis();
        let end = params.end.as_millis();
        let mut children: Vec<Box<dyn EntryIterator>> = self
            .streams
            .iter()
            .filter(|s| params.selector.matchers.iter().all(|m| m.matches(&s.labels)))
            .map(|s| {
                let mut entries: Vec<_> = s
                    .entries
                    .iter()
                    .filter(|e| e.timestamp_ms >= start && e.timestamp_ms <= end)
                    .cloned()
                    .collect();
                entries.sort_by_key(|e| e.timestamp_ms);
                if params.direction == Direction::Backward {
                    entries.reverse();
                }
                Box::new(StreamIterator::new(s.labels.clone(), entries)) as Box<dyn EntryIterator>
            })
            .collect();
        if let Some(err) = &self.iterator_error {
            children.push(Box::new(ErrorEntryIterator(err.clone())));
        }
        Ok(Box::new(MergeEntryIterator::new(children, params.direction)))
    }

    async fn select_samples(
        &self,
        _ctx: &QueryContext,
        params: SelectSampleParams,
    ) -> Result<Box<dyn SampleIterator>> {
        self.sample_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(params.clone());
        self.before_select().await?;

        let mut samples = match &params.expr {
            Expr::Sample(SampleExpr::RangeAggregation(range)) => {
                self.matching_samples(&range.left.selector, &params)
            }
            Expr::Variants(variants) => {
                let matched = self.matching_samples(&variants.log_range.selector, &params);
                (0..variants.variants.len())
                    .flat_map(|i| {
                        let variant = i.to_string();
                        matched.iter().map(move |s| {
                            Sample::new(
                                s.labels.with(VARIANT_LABEL, variant.as_str()),
                                s.timestamp_ms,
                                s.value,
                            )
                        })
                    })
                    .collect()
            }
            expr => {
                return Err(QueryError::Querier(format!(
                    "cannot select samples for {expr}"
                )));
            }
        };
        samples.sort_by(|a, b| {
            a.timestamp_ms
                .cmp(&b.timestamp_ms)
                .then_with(|| a.labels.cmp(&b.labels))
        });

        let data: Box<dyn SampleIterator> = Box::new(VecSampleIterator::new(samples));
        Ok(match &self.iterator_error {
            Some(err) => Box::new(MergeSampleIterator::new(vec![
                data,
                Box::new(ErrorSampleIterator(err.clone())),
            ])),
            None => data,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::labels::{LabelMatcher, Labels};
    use crate::model::Entry;
    use crate::syntax::{LogRangeExpr, RangeOp, VariantsExpr};
    use crate::timestamp::Timestamp;

    fn foo_range() -> LogRangeExpr {
        LogRangeExpr::new(
            LogSelectorExpr::new(vec![LabelMatcher::equal("app", "foo")]),
            Duration::from_secs(60),
        )
    }

    fn querier() -> MemoryQuerier {
        let foo = Labels::from_pairs([("app", "foo")]);
        let bar = Labels::from_pairs([("app", "bar")]);
        MemoryQuerier::new().with_samples(vec![
            Sample::new(foo.clone(), 2000, 1.0),
            Sample::new(bar, 1000, 1.0),
            Sample::new(foo, 9000, 1.0),
        ])
    }

    fn drain(mut iter: Box<dyn SampleIterator>) -> Vec<Sample> {
        let mut out = Vec::new();
        while let Some(s) = iter.next() {
            out.push(s);
        }
        out
    }

    #[tokio::test]
    async fn should_filter_samples_by_matchers_and_time() {
        // given:
        let querier = querier();
        let params = SelectSampleParams {
            expr: Expr::Sample(SampleExpr::range(RangeOp::CountOverTime, foo_range())),
            start: Timestamp::from_millis(0),
            end: Timestamp::from_millis(5000),
            shards: vec![],
        };

        // when:
        let iter = querier
            .select_samples(&QueryContext::new(), params)
            .await
            .unwrap();

        // then:
        let samples = drain(iter);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp_ms, 2000);
        assert_eq!(querier.sample_requests().len(), 1);
    }

    #[tokio::test]
    async fn should_tag_samples_per_variant() {
        let querier = querier();
        let variants = VariantsExpr {
            variants: vec![
                SampleExpr::range(RangeOp::CountOverTime, foo_range()),
                SampleExpr::range(RangeOp::BytesOverTime, foo_range()),
            ],
            log_range: foo_range(),
        };
        let params = SelectSampleParams {
            expr: Expr::Variants(variants),
            start: Timestamp::from_millis(0),
            end: Timestamp::from_millis(5000),
            shards: vec![],
        };

        let iter = querier
            .select_samples(&QueryContext::new(), params)
            .await
            .unwrap();

        let variants: Vec<Option<String>> = drain(iter)
            .iter()
            .map(|s| s.labels.get(VARIANT_LABEL).map(str::to_string))
            .collect();
        assert_eq!(variants, vec![Some("0".to_string()), Some("1".to_string())]);
    }

    #[tokio::test]
    async fn should_order_entries_by_direction() {
        // given:
        let querier = MemoryQuerier::new().with_streams(vec![Stream {
            labels: Labels::from_pairs([("app", "foo")]),
            entries: vec![Entry::new(1000, "a"), Entry::new(3000, "b"), Entry::new(2000, "c")],
        }]);
        let params = SelectLogParams {
            selector: LogSelectorExpr::new(vec![LabelMatcher::equal("app", "foo")]),
            start: Timestamp::from_millis(0),
            end: Timestamp::from_millis(2500),
            direction: Direction::Backward,
            limit: 0,
            shards: vec![],
        };

        // when:
        let mut iter = querier
            .select_logs(&QueryContext::new(), params)
            .await
            .unwrap();

        // then:
        let mut lines = Vec::new();
        while let Some((_, entry)) = iter.next() {
            lines.push(entry.line);
        }
        assert_eq!(lines, vec!["c", "a"]);
        assert_eq!(querier.log_requests().len(), 1);
    }

    #[tokio::test]
    async fn should_fail_selection_with_injected_error() {
        let querier = querier().with_select_error(QueryError::Querier("down".to_string()));
        let params = SelectSampleParams {
            expr: Expr::Sample(SampleExpr::range(RangeOp::CountOverTime, foo_range())),
            start: Timestamp::from_millis(0),
            end: Timestamp::from_millis(5000),
            shards: vec![],
        };

        let result = querier.select_samples(&QueryContext::new(), params).await;

        assert!(matches!(result, Err(QueryError::Querier(_))));
    }
}
