//! Pull-based iterators handed out by a [`Querier`](crate::querier::Querier).
//!
//! Iterators report exhaustion by returning `None` from `next`; callers must
//! then consult `error` to tell a clean end from a failure.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{QueryError, Result};
use crate::labels::Labels;
use crate::model::{Entry, Sample};
use crate::params::Direction;

/// Samples in ascending timestamp order.
pub trait SampleIterator: Send {
    fn next(&mut self) -> Option<Sample>;

    fn error(&self) -> Option<QueryError>;

    fn close(&mut self) -> Result<()>;
}

/// Log entries of possibly many streams, ordered by the query direction.
pub trait EntryIterator: Send {
    fn next(&mut self) -> Option<(Labels, Entry)>;

    fn error(&self) -> Option<QueryError>;

    fn close(&mut self) -> Result<()>;
}

/// Iterates a pre-sorted list of samples.
pub struct VecSampleIterator {
    samples: std::vec::IntoIter<Sample>,
}

impl VecSampleIterator {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: samples.into_iter(),
        }
    }
}

impl SampleIterator for VecSampleIterator {
    fn next(&mut self) -> Option<Sample> {
        self.samples.next()
    }

    fn error(&self) -> Option<QueryError> {
        None
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fails immediately with the given error.
pub struct ErrorSampleIterator(pub QueryError);

impl SampleIterator for ErrorSampleIterator {
    fn next(&mut self) -> Option<Sample> {
        None
    }

    fn error(&self) -> Option<QueryError> {
        Some(self.0.clone())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct HeapSample {
    sample: Sample,
    source: usize,
}

// BinaryHeap is a max-heap; order so the earliest sample surfaces first.
impl Ord for HeapSample {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .sample
            .timestamp_ms
            .cmp(&self.sample.timestamp_ms)
            .then_with(|| other.sample.labels.cmp(&self.sample.labels))
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapSample {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapSample {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapSample {}

/// Merges several timestamp-ordered iterators into one.
///
/// A child that fails is dropped from the merge and its error is reported by
/// `error` once the remaining children are drained.
pub struct MergeSampleIterator {
    children: Vec<Box<dyn SampleIterator>>,
    heap: BinaryHeap<HeapSample>,
    errors: Vec<QueryError>,
}

impl MergeSampleIterator {
    pub fn new(children: Vec<Box<dyn SampleIterator>>) -> Self {
        let mut it = Self {
            heap: BinaryHeap::with_capacity(children.len()),
            children,
            errors: Vec::new(),
        };
        for source in 0..it.children.len() {
            it.advance(source);
        }
        it
    }

    fn advance(&mut self, source: usize) {
        match self.children[source].next() {
            Some(sample) => self.heap.push(HeapSample { sample, source }),
            None => {
                if let Some(err) = self.children[source].error() {
                    self.errors.push(err);
                }
            }
        }
    }
}

impl SampleIterator for MergeSampleIterator {
    fn next(&mut self) -> Option<Sample> {
        let HeapSample { sample, source } = self.heap.pop()?;
        self.advance(source);
        Some(sample)
    }

    fn error(&self) -> Option<QueryError> {
        QueryError::from_many(self.errors.clone())
    }

    fn close(&mut self) -> Result<()> {
        let errors: Vec<QueryError> = self
            .children
            .iter_mut()
            .filter_map(|c| c.close().err())
            .collect();
        QueryError::from_many(errors).map_or(Ok(()), Err)
    }
}

/// Entries of a single stream, already in query direction.
pub struct StreamIterator {
    labels: Labels,
    entries: std::vec::IntoIter<Entry>,
}

impl StreamIterator {
    pub fn new(labels: Labels, entries: Vec<Entry>) -> Self {
        Self {
            labels,
            entries: entries.into_iter(),
        }
    }
}

impl EntryIterator for StreamIterator {
    fn next(&mut self) -> Option<(Labels, Entry)> {
        self.entries.next().map(|e| (self.labels.clone(), e))
    }

    fn error(&self) -> Option<QueryError> {
        None
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct ErrorEntryIterator(pub QueryError);

impl EntryIterator for ErrorEntryIterator {
    fn next(&mut self) -> Option<(Labels, Entry)> {
        None
    }

    fn error(&self) -> Option<QueryError> {
        Some(self.0.clone())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct HeapEntry {
    labels: Labels,
    entry: Entry,
    source: usize,
    direction: Direction,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_time = match self.direction {
            Direction::Forward => other.entry.timestamp_ms.cmp(&self.entry.timestamp_ms),
            Direction::Backward => self.entry.timestamp_ms.cmp(&other.entry.timestamp_ms),
        };
        by_time
            .then_with(|| other.labels.cmp(&self.labels))
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Merges streams into one sequence ordered by `direction`.
pub struct MergeEntryIterator {
    children: Vec<Box<dyn EntryIterator>>,
    heap: BinaryHeap<HeapEntry>,
    errors: Vec<QueryError>,
    direction: Direction,
}

impl MergeEntryIterator {
    pub fn new(children: Vec<Box<dyn EntryIterator>>, direction: Direction) -> Self {
        let mut it = Self {
            heap: BinaryHeap::with_capacity(children.len()),
            children,
            errors: Vec::new(),
            direction,
        };
        for source in 0..it.children.len() {
            it.advance(source);
        }
        it
    }

    fn advance(&mut self, source: usize) {
        match self.children[source].next() {
            Some((labels, entry)) => self.heap.push(HeapEntry {
                labels,
                entry,
                source,
                direction: self.direction,
            }),
            None => {
                if let Some(err) = self.children[source].error() {
                    self.errors.push(err);
                }
            }
        }
    }
}

impl EntryIterator for MergeEntryIterator {
    fn next(&mut self) -> Option<(Labels, Entry)> {
        let HeapEntry {
            labels,
            entry,
            source,
            ..
        } = self.heap.pop()?;
        self.advance(source);
        Some((labels, entry))
    }

    fn error(&self) -> Option<QueryError> {
        QueryError::from_many(self.errors.clone())
    }

    fn close(&mut self) -> Result<()> {
        let errors: Vec<QueryError> = self
            .children
            .iter_mut()
            .filter_map(|c| c.close().err())
            .collect();
        QueryError::from_many(errors).map_or(Ok(()), Err)
    }
}
