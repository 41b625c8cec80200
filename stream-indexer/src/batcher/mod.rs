//! Batcher module for the stream indexer ingest.
//!
//! Accumulates decoded documents until a size, byte or latency bound is hit.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use stream_indexer_shared::{
    IndexDocument, OffsetRange, PartitionRange, RecordPosition, TopicPartition,
};
use tokio::time::Instant;
use tracing::debug;

/// Default maximum number of documents per batch.
pub const DEFAULT_MAX_DOCS: usize = 500;

/// Default maximum payload bytes per batch (5 MiB).
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Default maximum age of a batch in milliseconds.
pub const DEFAULT_MAX_LATENCY_MS: u64 = 1000;

/// Bounds that trigger a flush.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_docs: usize,
    pub max_bytes: usize,
    pub max_latency: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_docs: DEFAULT_MAX_DOCS,
            max_bytes: DEFAULT_MAX_BYTES,
            max_latency: Duration::from_millis(DEFAULT_MAX_LATENCY_MS),
        }
    }
}

/// Why a batch is ready to be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    MaxDocs,
    MaxBytes,
    MaxLatency,
    /// Final flush while the consumer loop stops.
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxDocs => write!(f, "max_docs"),
            Self::MaxBytes => write!(f, "max_bytes"),
            Self::MaxLatency => write!(f, "max_latency"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A unit of work for the index writer.
///
/// `coverage` spans every record the batch accounts for, including records
/// that were skipped because they could not be decoded. Once the batch is
/// resolved, the last offset of each range is safe to commit.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub documents: Vec<IndexDocument>,
    pub coverage: BTreeMap<TopicPartition, OffsetRange>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.coverage.is_empty()
    }

    /// Offset ranges covered by this batch, ordered by partition.
    pub fn ranges(&self) -> Vec<PartitionRange> {
        to_ranges(&self.coverage)
    }
}

fn to_ranges(coverage: &BTreeMap<TopicPartition, OffsetRange>) -> Vec<PartitionRange> {
    coverage
        .iter()
        .map(|(partition, range)| PartitionRange {
            partition: partition.clone(),
            range: *range,
        })
        .collect()
}

/// Collects documents in arrival order and decides when to flush.
///
/// There is no background timer: the consumer loop asks for a
/// [`FlushReason`] after each push and once per poll cycle.
#[derive(Debug)]
pub struct BatchAccumulator {
    config: BatchConfig,
    documents: Vec<IndexDocument>,
    coverage: BTreeMap<TopicPartition, OffsetRange>,
    bytes: usize,
    opened_at: Option<Instant>,
}

impl BatchAccumulator {
    pub fn new(config: BatchConfig) -> Self {
        let capacity = config.max_docs.min(DEFAULT_MAX_DOCS);
        Self {
            config,
            documents: Vec::with_capacity(capacity),
            coverage: BTreeMap::new(),
            bytes: 0,
            opened_at: None,
        }
    }

    /// Add a decoded document.
    pub fn push(&mut self, document: IndexDocument) {
        self.cover(&document.origin);
        self.bytes += document.size_bytes;
        self.documents.push(document);
    }

    /// Account for a record that produced no document.
    pub fn skip(&mut self, position: &RecordPosition) {
        self.cover(position);
    }

    fn cover(&mut self, position: &RecordPosition) {
        if self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
        }
        self.coverage
            .entry(position.topic_partition())
            .and_modify(|range| range.extend(position.offset))
            .or_insert_with(|| OffsetRange::single(position.offset));
    }

    /// The bound the current batch has reached, if any.
    ///
    /// A batch made only of skipped records still reports `MaxLatency` so
    /// that their offsets get committed.
    pub fn flush_reason(&self, now: Instant) -> Option<FlushReason> {
        if self.documents.len() >= self.config.max_docs {
            return Some(FlushReason::MaxDocs);
        }
        if self.bytes >= self.config.max_bytes {
            return Some(FlushReason::MaxBytes);
        }
        match self.opened_at {
            Some(opened) if now.saturating_duration_since(opened) >= self.config.max_latency => {
                Some(FlushReason::MaxLatency)
            }
            _ => None,
        }
    }

    /// Time left before the open batch hits its latency bound.
    ///
    /// `None` while nothing is accumulated.
    pub fn latency_remaining(&self, now: Instant) -> Option<Duration> {
        self.opened_at
            .map(|opened| (opened + self.config.max_latency).saturating_duration_since(now))
    }

    /// Take the accumulated batch and reset the accumulator.
    pub fn take(&mut self) -> Batch {
        self.bytes = 0;
        self.opened_at = None;
        Batch {
            documents: std::mem::take(&mut self.documents),
            coverage: std::mem::take(&mut self.coverage),
        }
    }

    /// Put back a batch whose write was abandoned, ahead of anything pushed since.
    pub fn restore(&mut self, batch: Batch) {
        if batch.is_empty() {
            return;
        }

        let mut documents = batch.documents;
        documents.append(&mut self.documents);
        self.documents = documents;

        for (partition, range) in batch.coverage {
            self.coverage
                .entry(partition)
                .and_modify(|current| {
                    current.extend(range.first);
                    current.extend(range.last);
                })
                .or_insert(range);
        }

        self.bytes = self.documents.iter().map(|doc| doc.size_bytes).sum();
        self.opened_at.get_or_insert_with(Instant::now);
    }

    /// Drop everything accumulated for revoked partitions.
    ///
    /// Returns the number of documents discarded. The records are consumed
    /// again by whichever member is assigned the partitions next.
    pub fn discard_partitions(&mut self, partitions: &[TopicPartition]) -> usize {
        if partitions.is_empty() || self.is_empty() {
            return 0;
        }

        let before = self.documents.len();
        self.documents
            .retain(|doc| !partitions.contains(&doc.topic_partition()));
        for partition in partitions {
            self.coverage.remove(partition);
        }
        self.bytes = self.documents.iter().map(|doc| doc.size_bytes).sum();

        if self.is_empty() {
            self.opened_at = None;
        }

        let discarded = before - self.documents.len();
        debug!(
            discarded = discarded,
            partitions = ?partitions,
            "Discarded pending documents of revoked partitions"
        );
        discarded
    }

    /// Offset ranges currently held, for shutdown and failure reports.
    pub fn pending_ranges(&self) -> Vec<PartitionRange> {
        to_ranges(&self.coverage)
    }

    /// True when neither documents nor skipped records are held.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.coverage.is_empty()
    }

    /// Number of documents held.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}
