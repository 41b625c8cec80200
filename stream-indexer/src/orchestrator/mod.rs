//! Orchestrator module for the stream indexer ingest.
//!
//! Runs the consumer loop: poll, decode, accumulate, flush, commit.

mod metrics;

pub use metrics::{MetricsSnapshot, PipelineMetrics};

use std::sync::Arc;
use std::time::Duration;

use stream_indexer_shared::{describe_ranges, OffsetRange, PartitionRange, RawRecord, TopicPartition};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::batcher::{BatchAccumulator, FlushReason};
use crate::consumer::{RebalanceEvent, RecordSource, SourceEvent};
use crate::errors::{FatalPipelineError, IngestError};
use crate::loader::IndexWriter;
use crate::processor::RecordDecoder;
use crate::tracker::OffsetTracker;

/// Default poll timeout in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 3000;

/// Default maximum number of records returned by one poll.
pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;

/// Default bound on the final drain in milliseconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_timeout: Duration,
    pub max_poll_records: usize,
    /// Upper bound on the final flush and commit.
    pub shutdown_timeout: Duration,
    /// How often a progress line is logged.
    pub progress_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// Where the consumer loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Polling,
    Decoding,
    Accumulating,
    Flushing,
    Committing,
    Draining,
    Stopped,
}

/// Progress line bookkeeping.
struct Progress {
    last: MetricsSnapshot,
    at: Instant,
}

/// Orchestrator that drives one consumer loop.
///
/// The loop is sequential: a batch is written and its offsets committed
/// before the next poll. Offsets are committed only once every record below
/// them is indexed, dropped by policy, or skipped as undecodable.
pub struct Orchestrator {
    source: Box<dyn RecordSource>,
    decoder: RecordDecoder,
    batcher: BatchAccumulator,
    writer: IndexWriter,
    tracker: OffsetTracker,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    metrics: Arc<PipelineMetrics>,
    state: LoopState,
}

impl Orchestrator {
    /// Create a new orchestrator with the given components.
    ///
    /// `cancel` stops the loop; the current batch is then drained within
    /// `config.shutdown_timeout`.
    pub fn new(
        source: Box<dyn RecordSource>,
        decoder: RecordDecoder,
        batcher: BatchAccumulator,
        writer: IndexWriter,
        config: OrchestratorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            decoder,
            batcher,
            writer,
            tracker: OffsetTracker::new(),
            config,
            cancel,
            metrics: Arc::new(PipelineMetrics::new()),
            state: LoopState::Stopped,
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn tracker(&self) -> &OffsetTracker {
        &self.tracker
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Trigger a graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the consumer loop until cancellation or a fatal error.
    ///
    /// Returns `Ok(())` after a clean shutdown, `IngestError::Fatal` when the
    /// pipeline cannot continue, and `IngestError::ShutdownTimedOut` when the
    /// final drain did not finish in time.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<(), IngestError> {
        info!("Starting stream indexer orchestrator");
        self.source.subscribe()?;
        info!("Ready to process records from Kafka");

        let outcome = self.consume().await;

        let result = match outcome {
            Ok(()) | Err(IngestError::Cancelled(_)) => self.drain().await,
            Err(e) => Err(e),
        };

        self.state = LoopState::Stopped;
        let totals = self.metrics.snapshot();

        match &result {
            Ok(()) => info!(
                records_received = totals.records_received,
                documents_indexed = totals.documents_indexed,
                records_skipped = totals.records_skipped,
                documents_dropped = totals.documents_dropped,
                "Orchestrator shutdown complete"
            ),
            Err(e) => error!(
                error = %e,
                uncommitted = %describe_ranges(&self.batcher.pending_ranges()),
                records_received = totals.records_received,
                documents_indexed = totals.documents_indexed,
                "Orchestrator stopped"
            ),
        }

        result
    }

    /// Poll cycles until cancelled.
    async fn consume(&mut self) -> Result<(), IngestError> {
        let cancel = self.cancel.clone();
        let mut progress = Progress {
            last: self.metrics.snapshot(),
            at: Instant::now(),
        };
        let mut poll_failures: u32 = 0;

        while !cancel.is_cancelled() {
            self.state = LoopState::Polling;
            let timeout = self.poll_timeout(Instant::now());
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = self.source.poll(self.config.max_poll_records, timeout) => polled,
            };

            match polled {
                Ok(events) => {
                    poll_failures = 0;
                    self.process(events).await?;
                }
                Err(e) => {
                    poll_failures += 1;
                    self.metrics.record_poll_failure();

                    let policy = self.writer.retry_policy().clone();
                    if !policy.allows_retry(poll_failures) {
                        return Err(FatalPipelineError::BrokerUnavailable {
                            attempts: poll_failures,
                            last_error: e.to_string(),
                        }
                        .into());
                    }

                    let delay = policy.delay_for(poll_failures);
                    warn!(
                        error = %e,
                        attempt = poll_failures,
                        delay_ms = delay.as_millis() as u64,
                        "Poll failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            if let Some(reason) = self.batcher.flush_reason(Instant::now()) {
                self.flush(reason, &cancel).await?;
            } else {
                self.commit_pending().await;
            }

            self.log_progress(&mut progress);
        }

        info!("Received shutdown signal");
        Ok(())
    }

    /// Poll timeout capped so an open batch is flushed on its latency bound.
    fn poll_timeout(&self, now: Instant) -> Duration {
        match self.batcher.latency_remaining(now) {
            Some(remaining) => remaining.min(self.config.poll_timeout),
            None => self.config.poll_timeout,
        }
    }

    /// Apply polled events in order, flushing whenever a bound is hit.
    ///
    /// Records of a partition revoked earlier in the same poll and not
    /// assigned back since are ignored.
    async fn process(&mut self, events: Vec<SourceEvent>) -> Result<(), IngestError> {
        if events.is_empty() {
            return Ok(());
        }

        let cancel = self.cancel.clone();
        let received = events.iter().filter_map(SourceEvent::as_record).count();
        self.metrics.record_received(received as u64);
        debug!(count = received, events = events.len(), "Processing polled records");

        let mut revoked: Vec<TopicPartition> = Vec::new();
        for event in events {
            let record = match event {
                SourceEvent::Record(record) => record,
                SourceEvent::Rebalance(rebalance) => {
                    self.apply_rebalance(rebalance, &mut revoked);
                    continue;
                }
            };

            if revoked.contains(&record.topic_partition()) {
                debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Ignoring record of revoked partition"
                );
                continue;
            }

            self.accumulate(&record);

            match self.batcher.flush_reason(Instant::now()) {
                Some(reason @ (FlushReason::MaxDocs | FlushReason::MaxBytes)) => {
                    self.flush(reason, &cancel).await?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn accumulate(&mut self, record: &RawRecord) {
        self.state = LoopState::Decoding;
        let decoded = self.decoder.decode(record);

        self.state = LoopState::Accumulating;
        match decoded {
            Ok(document) => self.batcher.push(document),
            Err(e) => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Skipping record that cannot be decoded"
                );
                self.metrics.record_skipped();
                self.batcher.skip(&record.position());
            }
        }
    }

    /// Write the accumulated batch, then advance and commit its offsets.
    async fn flush(
        &mut self,
        reason: FlushReason,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        let batch = self.batcher.take();
        if batch.is_empty() {
            return Ok(());
        }

        self.state = LoopState::Flushing;
        debug!(
            reason = %reason,
            documents = batch.documents.len(),
            ranges = %describe_ranges(&batch.ranges()),
            "Flushing batch"
        );

        let report = match self.writer.write(&batch, cancel).await {
            Ok(report) => report,
            Err(e) => {
                if matches!(e, IngestError::Cancelled(_)) {
                    self.batcher.restore(batch);
                }
                return Err(e);
            }
        };

        self.metrics.record_batch(
            report.indexed as u64,
            report.dropped.len() as u64,
            report.attempts,
        );

        self.state = LoopState::Committing;
        for (partition, range) in &batch.coverage {
            self.tracker.record(partition, range.last);
        }

        info!(
            reason = %reason,
            indexed = report.indexed,
            dropped = report.dropped.len(),
            attempts = report.attempts,
            ranges = %describe_ranges(&batch.ranges()),
            "Batch indexed"
        );

        self.commit_pending().await;
        Ok(())
    }

    /// Commit every checkpoint the broker has not acknowledged yet.
    ///
    /// Failures are logged and retried on the next cycle.
    async fn commit_pending(&mut self) -> bool {
        let pending = self.tracker.pending_commits();
        if pending.is_empty() {
            return true;
        }

        self.state = LoopState::Committing;
        match self.source.commit(&pending).await {
            Ok(()) => {
                self.tracker.mark_committed(&pending);
                self.metrics.record_commit();
                true
            }
            Err(e) => {
                self.metrics.record_commit_failure();
                warn!(
                    error = %e,
                    partitions = pending.len(),
                    "Failed to commit offsets, will retry"
                );
                false
            }
        }
    }

    /// Apply one assignment change.
    ///
    /// Pending documents of revoked partitions are discarded along with their
    /// checkpoints. `revoked` tracks partitions revoked during the current
    /// poll and not assigned back since.
    fn apply_rebalance(&mut self, event: RebalanceEvent, revoked: &mut Vec<TopicPartition>) {
        match event {
            RebalanceEvent::Assigned(partitions) => {
                info!(partitions = ?partitions, "Partitions assigned");
                revoked.retain(|p| !partitions.contains(p));
            }
            RebalanceEvent::Revoked(partitions) => {
                let discarded = self.batcher.discard_partitions(&partitions);
                for partition in &partitions {
                    self.tracker.revoke(partition);
                }
                self.metrics.record_discarded(discarded as u64);
                info!(
                    partitions = ?partitions,
                    discarded = discarded,
                    "Partitions revoked, pending documents discarded"
                );
                for partition in partitions {
                    if !revoked.contains(&partition) {
                        revoked.push(partition);
                    }
                }
            }
        }
    }

    /// Final flush and commit, bounded by the shutdown timeout.
    async fn drain(&mut self) -> Result<(), IngestError> {
        self.state = LoopState::Draining;

        let in_flight = self.batcher.pending_ranges();
        info!(
            documents = self.batcher.len(),
            ranges = %describe_ranges(&in_flight),
            timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
            "Draining before shutdown"
        );

        // The loop token is already cancelled; the drain is bounded by the timeout instead.
        let drain_token = CancellationToken::new();
        let timeout = self.config.shutdown_timeout;

        let drained = tokio::time::timeout(timeout, self.drain_batch(&drain_token)).await;
        match drained {
            Ok(result) => result,
            Err(_) => {
                let uncommitted = self.uncommitted(in_flight);
                error!(
                    uncommitted = %describe_ranges(&uncommitted),
                    "Shutdown timed out"
                );
                Err(IngestError::ShutdownTimedOut { uncommitted })
            }
        }
    }

    async fn drain_batch(&mut self, cancel: &CancellationToken) -> Result<(), IngestError> {
        if !self.batcher.is_empty() {
            self.flush(FlushReason::Shutdown, cancel).await?;
        } else if !self.commit_pending().await {
            warn!("Final commit failed, the last offsets will be reprocessed");
        }
        Ok(())
    }

    /// Ranges that were in flight plus checkpoints never acknowledged.
    fn uncommitted(&self, mut ranges: Vec<PartitionRange>) -> Vec<PartitionRange> {
        for (partition, commit_point) in self.tracker.pending_commits() {
            if !ranges.iter().any(|r| r.partition == partition) {
                ranges.push(PartitionRange {
                    partition,
                    range: OffsetRange::single(commit_point - 1),
                });
            }
        }
        ranges
    }

    fn log_progress(&self, progress: &mut Progress) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(progress.at);
        if elapsed < self.config.progress_interval {
            return;
        }

        let current = self.metrics.snapshot();
        let elapsed_secs = elapsed.as_secs_f64();
        let records_per_sec =
            current.records_received.saturating_sub(progress.last.records_received) as f64
                / elapsed_secs;
        let documents_per_sec = current
            .documents_indexed
            .saturating_sub(progress.last.documents_indexed) as f64
            / elapsed_secs;

        info!(
            records_received = current.records_received,
            documents_indexed = current.documents_indexed,
            records_skipped = current.records_skipped,
            documents_dropped = current.documents_dropped,
            index_retries = current.index_retries,
            commit_failures = current.commit_failures,
            records_per_sec = format!("{:.2}", records_per_sec),
            documents_per_sec = format!("{:.2}", documents_per_sec),
            partitions = self.tracker.partitions().len(),
            "Processing progress"
        );

        progress.last = current;
        progress.at = now;
    }
}
