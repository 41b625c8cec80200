//! Loader module for the stream indexer ingest.
//!
//! Writes batches into the search index and resolves every document of the
//! batch: indexed, dropped by policy, or escalated.

mod retry;

pub use retry::{RetryPolicy, DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MS};

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use stream_indexer_repository::{BulkItemStatus, IndexDocumentRequest, SearchIndexProvider};
use stream_indexer_shared::{
    IndexDocument, OffsetRange, PartitionRange, RecordPosition, TopicPartition,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::batcher::Batch;
use crate::errors::{FatalPipelineError, IngestError};

/// What to do with a document the index rejects for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermanentFailurePolicy {
    /// Drop the document, log it and keep going. Its offset is committed.
    #[default]
    Skip,
    /// Stop the pipeline without committing the batch.
    Halt,
}

impl FromStr for PermanentFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "halt" => Ok(Self::Halt),
            other => Err(format!(
                "Unknown permanent failure policy '{}', expected 'skip' or 'halt'",
                other
            )),
        }
    }
}

/// A document dropped under [`PermanentFailurePolicy::Skip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedDocument {
    pub position: RecordPosition,
    pub document_id: String,
    pub reason: String,
}

/// Outcome of a successful [`IndexWriter::write`].
///
/// Every document of the batch is either counted in `indexed` or listed in
/// `dropped`.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    pub indexed: usize,
    pub dropped: Vec<DroppedDocument>,
    /// Bulk requests issued for the batch.
    pub attempts: u32,
}

/// Writes batches through a [`SearchIndexProvider`] with bounded retries.
pub struct IndexWriter {
    provider: Arc<dyn SearchIndexProvider>,
    retry: RetryPolicy,
    permanent_failure_policy: PermanentFailurePolicy,
}

impl IndexWriter {
    /// Create a new index writer with the given provider.
    pub fn new(
        provider: Arc<dyn SearchIndexProvider>,
        retry: RetryPolicy,
        permanent_failure_policy: PermanentFailurePolicy,
    ) -> Self {
        Self {
            provider,
            retry,
            permanent_failure_policy,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Write every document of `batch`.
    ///
    /// Only documents that failed with a retryable error are sent again.
    /// Returns once every document is resolved, or with:
    ///
    /// * `IngestError::Fatal` - retries exhausted, the whole request was
    ///   rejected, or a permanent failure under the `halt` policy
    /// * `IngestError::Cancelled` - `cancel` fired during a backoff wait
    #[instrument(skip_all, fields(documents = batch.documents.len()))]
    pub async fn write(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> Result<WriteReport, IngestError> {
        let documents = &batch.documents;
        let mut report = WriteReport::default();
        if documents.is_empty() {
            return Ok(report);
        }

        let mut pending: Vec<usize> = (0..documents.len()).collect();
        // Latest batch position written for each (index, id).
        let mut written: HashMap<(String, String), usize> = HashMap::new();
        let mut last_error = String::new();

        loop {
            report.attempts += 1;
            let attempt = report.attempts;

            let requests: Vec<IndexDocumentRequest> =
                pending.iter().map(|&i| to_request(&documents[i])).collect();

            // Batch position and, when known, the (index, id) the write targeted.
            let mut retryable: Vec<(usize, Option<(String, String)>)> = Vec::new();

            match self.provider.bulk_index(&requests).await {
                Ok(summary) if summary.results.len() == requests.len() => {
                    for (&position, result) in pending.iter().zip(summary.results) {
                        let key = (result.index, result.document_id);
                        match result.status {
                            BulkItemStatus::Indexed => {
                                report.indexed += 1;
                                let latest = written.entry(key).or_insert(position);
                                *latest = (*latest).max(position);
                            }
                            BulkItemStatus::Retryable(reason) => {
                                retryable.push((position, Some(key)));
                                last_error = reason;
                            }
                            BulkItemStatus::Permanent(reason) => {
                                let doc = &documents[position];
                                match self.permanent_failure_policy {
                                    PermanentFailurePolicy::Skip => {
                                        error!(
                                            position = %doc.origin,
                                            document_id = %doc.id,
                                            reason = %reason,
                                            "Document permanently rejected, skipping"
                                        );
                                        report.dropped.push(DroppedDocument {
                                            position: doc.origin.clone(),
                                            document_id: doc.id.clone(),
                                            reason,
                                        });
                                    }
                                    PermanentFailurePolicy::Halt => {
                                        error!(
                                            position = %doc.origin,
                                            document_id = %doc.id,
                                            reason = %reason,
                                            "Document permanently rejected, halting"
                                        );
                                        return Err(FatalPipelineError::PermanentFailure {
                                            position: doc.origin.clone(),
                                            reason,
                                        }
                                        .into());
                                    }
                                }
                            }
                        }
                    }
                }
                Ok(summary) => {
                    last_error = format!(
                        "Bulk response has {} results for {} documents",
                        summary.results.len(),
                        requests.len()
                    );
                    warn!(error = %last_error, "Retrying whole request");
                    retryable = pending.iter().map(|&i| (i, None)).collect();
                }
                Err(e) if e.is_retryable() => {
                    last_error = e.to_string();
                    warn!(error = %e, attempt = attempt, "Bulk request failed");
                    retryable = pending.iter().map(|&i| (i, None)).collect();
                }
                Err(e) => {
                    error!(error = %e, "Bulk request rejected");
                    return Err(FatalPipelineError::BulkRejected {
                        ranges: batch.ranges(),
                        reason: e.to_string(),
                    }
                    .into());
                }
            }

            pending = retryable
                .into_iter()
                .filter(|(position, key)| {
                    let superseded = key
                        .as_ref()
                        .and_then(|key| written.get(key))
                        .is_some_and(|&latest| latest > *position);
                    if superseded {
                        debug!(
                            position = %documents[*position].origin,
                            document_id = %documents[*position].id,
                            "Failed write superseded by a newer write of the same document"
                        );
                    }
                    !superseded
                })
                .map(|(position, _)| position)
                .collect();

            if pending.is_empty() {
                if report.attempts > 1 || !report.dropped.is_empty() {
                    debug!(
                        attempts = report.attempts,
                        indexed = report.indexed,
                        dropped = report.dropped.len(),
                        "Batch resolved"
                    );
                }
                return Ok(report);
            }

            let ranges = ranges_of(pending.iter().map(|&i| &documents[i]));

            if !self.retry.allows_retry(attempt) {
                error!(
                    attempts = attempt,
                    pending = pending.len(),
                    error = %last_error,
                    "Indexing retries exhausted"
                );
                return Err(FatalPipelineError::RetriesExhausted {
                    attempts: attempt,
                    ranges,
                    last_error,
                }
                .into());
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                attempt = attempt,
                pending = pending.len(),
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Retrying failed documents"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(pending = pending.len(), "Write cancelled during backoff");
                    return Err(IngestError::Cancelled(batch.ranges()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn to_request(document: &IndexDocument) -> IndexDocumentRequest {
    IndexDocumentRequest {
        document_id: document.id.clone(),
        timestamp_ms: document.origin.timestamp,
        source: document.source.clone(),
    }
}

fn ranges_of<'a>(documents: impl Iterator<Item = &'a IndexDocument>) -> Vec<PartitionRange> {
    let mut ranges: BTreeMap<TopicPartition, OffsetRange> = BTreeMap::new();
    for doc in documents {
        ranges
            .entry(doc.topic_partition())
            .and_modify(|range| range.extend(doc.origin.offset))
            .or_insert_with(|| OffsetRange::single(doc.origin.offset));
    }
    ranges
        .into_iter()
        .map(|(partition, range)| PartitionRange { partition, range })
        .collect()
}
