//! Request and response types for search index operations.

use serde_json::{Map, Value};

/// Request to write one document to the search index.
///
/// Writes are full-document upserts keyed by `document_id`: writing the same
/// id twice leaves the index in the same state as writing it once.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocumentRequest {
    /// The document id in the index.
    pub document_id: String,
    /// Record timestamp in milliseconds, used for date based index naming.
    pub timestamp_ms: Option<i64>,
    /// The document body.
    pub source: Map<String, Value>,
}

/// Outcome of one document within a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkItemStatus {
    /// The document was written.
    Indexed,
    /// The write failed but may succeed if sent again (throttling, shard
    /// unavailability, server errors).
    Retryable(String),
    /// The index rejected the document itself (mapping conflict, malformed
    /// field); sending it again will fail the same way.
    Permanent(String),
}

impl BulkItemStatus {
    /// Classify a per-item HTTP status from a bulk response.
    pub fn from_item_status(status: u16, reason: impl Into<String>) -> Self {
        match status {
            200..=299 => Self::Indexed,
            429 | 500..=599 => Self::Retryable(reason.into()),
            _ => Self::Permanent(reason.into()),
        }
    }
}

/// Result of a bulk operation for a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    /// The index the document was routed to.
    pub index: String,
    /// The document id.
    pub document_id: String,
    /// What happened to the document.
    pub status: BulkItemStatus,
}

/// Summary of a bulk operation.
///
/// `results` has exactly one entry per request, in request order, so callers
/// can map results back to their inputs by position.
#[derive(Debug, Clone, Default)]
pub struct BulkIndexSummary {
    /// Total number of documents in the request.
    pub total: usize,
    /// Number of documents written.
    pub succeeded: usize,
    /// Number of documents that failed (retryable or permanent).
    pub failed: usize,
    /// Individual results for each document.
    pub results: Vec<BulkItemResult>,
}

impl BulkIndexSummary {
    /// Build a summary from per-document results, computing the counters.
    pub fn from_results(results: Vec<BulkItemResult>) -> Self {
        let succeeded = results
            .iter()
            .filter(|r| r.status == BulkItemStatus::Indexed)
            .count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}
