//! Search index provider trait definition.
//!
//! This module defines the abstract interface for search index operations,
//! allowing for different backend implementations (OpenSearch, Elasticsearch, etc.).

use async_trait::async_trait;

use crate::errors::SearchIndexError;
use crate::types::{BulkIndexSummary, IndexDocumentRequest};

/// Abstracts the underlying search index implementation (OpenSearch, Elasticsearch, etc.).
///
/// Implementations are shared between consumer loops behind an `Arc`, so they
/// must be `Send + Sync` and must not keep per-call state.
///
/// # Upsert semantics
///
/// `bulk_index` writes whole documents keyed by their id. Writing a document
/// that already exists replaces it, which is what makes reprocessing after a
/// crash or a retry safe.
///
/// # Index Initialization
///
/// Callers should call `ensure_index_exists` during application startup so the
/// index (or index template) is configured before documents arrive.
#[async_trait]
pub trait SearchIndexProvider: Send + Sync {
    /// Check that the backend is reachable.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the backend answered
    /// * `Err(SearchIndexError)` - If it could not be reached
    async fn ping(&self) -> Result<(), SearchIndexError>;

    /// Ensure the search index (or the template for dated indexes) exists,
    /// creating it if necessary.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the index is ready for use
    /// * `Err(SearchIndexError)` - If initialization fails
    async fn ensure_index_exists(&self) -> Result<(), SearchIndexError>;

    /// Write documents in a single bulk request.
    ///
    /// # Arguments
    ///
    /// * `requests` - Documents to write, in order
    ///
    /// # Returns
    ///
    /// * `Ok(BulkIndexSummary)` - One result per request, in request order.
    ///   Individual documents may have failed.
    /// * `Err(SearchIndexError)` - If the request failed as a whole; use
    ///   [`SearchIndexError::is_retryable`] to decide whether to send it again
    async fn bulk_index(
        &self,
        requests: &[IndexDocumentRequest],
    ) -> Result<BulkIndexSummary, SearchIndexError>;
}
