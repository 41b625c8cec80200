//! Pipeline counters shared between a consumer loop and its observers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters of one consumer loop.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    records_received: AtomicU64,
    records_skipped: AtomicU64,
    documents_indexed: AtomicU64,
    documents_dropped: AtomicU64,
    documents_discarded: AtomicU64,
    batches_flushed: AtomicU64,
    index_retries: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
    poll_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Records read from the broker.
    pub records_received: u64,
    /// Records that could not be decoded.
    pub records_skipped: u64,
    pub documents_indexed: u64,
    /// Documents rejected by the index and dropped by policy.
    pub documents_dropped: u64,
    /// Documents thrown away because their partition was revoked.
    pub documents_discarded: u64,
    pub batches_flushed: u64,
    /// Bulk requests sent beyond the first one of each batch.
    pub index_retries: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub poll_failures: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, count: u64) {
        self.records_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, indexed: u64, dropped: u64, attempts: u32) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.documents_indexed.fetch_add(indexed, Ordering::Relaxed);
        self.documents_dropped.fetch_add(dropped, Ordering::Relaxed);
        self.index_retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: u64) {
        self.documents_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            documents_dropped: self.documents_dropped.load(Ordering::Relaxed),
            documents_discarded: self.documents_discarded.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            index_retries: self.index_retries.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }
}
