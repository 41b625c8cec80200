//! # Stream Indexer
//!
//! Consumes JSON records from Kafka and indexes them into OpenSearch with
//! at-least-once delivery: a partition offset is committed only after every
//! record below it is indexed, dropped by policy, or skipped as undecodable.
//!
//! ## Architecture
//!
//! Each worker runs one sequential consumer loop:
//!
//! 1. **Consumer**: Polls raw records from Kafka and commits offsets
//! 2. **Processor**: Decodes records into search documents
//! 3. **Batcher**: Groups documents by count, bytes and latency
//! 4. **Loader**: Writes batches with bounded retries
//! 5. **Tracker**: Holds the highest resolved offset per partition
//! 6. **Orchestrator**: Drives the loop, rebalances and shutdown
//!
//! ## Modules
//!
//! - [`config`]: Configuration and dependency initialization
//! - [`consumer`]: Record source abstraction and Kafka consumer
//! - [`processor`]: Record decoding and document ids
//! - [`batcher`]: Batch accumulation
//! - [`loader`]: Index writer and retry policy
//! - [`tracker`]: Offset tracking
//! - [`orchestrator`]: The consumer loop
//! - [`errors`]: Error types for the indexer

pub mod batcher;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod loader;
pub mod orchestrator;
pub mod processor;
pub mod tracker;

pub use config::{Dependencies, IndexerConfig};
pub use errors::IngestError;

use thiserror::Error;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Ingest error.
    #[error("Ingest error: {0}")]
    IngestError(#[from] IngestError),

    /// A worker task panicked or was aborted.
    #[error("Worker failed: {0}")]
    WorkerError(String),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
