//! # Stream Indexer Repository
//!
//! This crate provides the trait and implementation for writing documents to
//! the search index. It includes the error type, the `SearchIndexProvider`
//! interface, and a concrete implementation for OpenSearch built on the
//! `_bulk` API.

pub mod errors;
pub mod interfaces;
pub mod opensearch;
pub mod types;
pub mod utils;

pub use errors::SearchIndexError;
pub use interfaces::SearchIndexProvider;
pub use opensearch::{IndexConfig, IndexNaming, OpenSearchProvider};
pub use types::{BulkIndexSummary, BulkItemResult, BulkItemStatus, IndexDocumentRequest};
