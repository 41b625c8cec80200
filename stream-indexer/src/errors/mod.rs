//! Error types for the stream indexer ingest.
//!
//! Errors are split by how the pipeline reacts to them:
//!
//! - [`DecodeError`]: one record could not be turned into a document. The
//!   record is skipped and its offset still advances.
//! - [`FatalPipelineError`]: the pipeline cannot make progress without losing
//!   data. Consumption stops and the affected offsets are reported.
//! - [`IngestError`]: everything a consumer loop can return.

use stream_indexer_shared::{describe_ranges, PartitionRange, RecordPosition};
use thiserror::Error;

/// A record that cannot be indexed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The record has no payload (tombstone or empty value).
    #[error("Empty payload")]
    EmptyPayload,

    /// The payload is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The payload is JSON, but not an object.
    #[error("Expected a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Errors after which a consumer loop stops.
///
/// Every variant names the partitions and offsets involved so reprocessing
/// can be diagnosed from the log line alone.
#[derive(Error, Debug, Clone)]
pub enum FatalPipelineError {
    /// Polling kept failing.
    #[error("Broker unreachable after {attempts} attempts: {last_error}")]
    BrokerUnavailable { attempts: u32, last_error: String },

    /// Some documents were still failing after the last retry.
    #[error(
        "Indexing retries exhausted after {attempts} attempts for {}: {last_error}",
        describe_ranges(.ranges)
    )]
    RetriesExhausted {
        attempts: u32,
        ranges: Vec<PartitionRange>,
        last_error: String,
    },

    /// A document was rejected by the index and the policy is to halt.
    #[error("Document at {position} permanently rejected by the index: {reason}")]
    PermanentFailure {
        position: RecordPosition,
        reason: String,
    },

    /// The index refused the bulk request as a whole.
    #[error("Bulk request rejected for {}: {reason}", describe_ranges(.ranges))]
    BulkRejected {
        ranges: Vec<PartitionRange>,
        reason: String,
    },
}

impl FatalPipelineError {
    /// Partition ranges left uncommitted by this failure.
    pub fn ranges(&self) -> Vec<PartitionRange> {
        match self {
            Self::BrokerUnavailable { .. } => Vec::new(),
            Self::RetriesExhausted { ranges, .. } | Self::BulkRejected { ranges, .. } => {
                ranges.clone()
            }
            Self::PermanentFailure { position, .. } => vec![PartitionRange {
                partition: position.topic_partition(),
                range: stream_indexer_shared::OffsetRange::single(position.offset),
            }],
        }
    }
}

/// Errors that can occur in the stream indexer ingest.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Kafka-related error.
    #[error("Kafka error: {0}")]
    KafkaError(String),

    /// The pipeline cannot continue.
    #[error("Fatal pipeline error: {0}")]
    Fatal(#[from] FatalPipelineError),

    /// A write was abandoned because shutdown was requested.
    #[error("Cancelled with {} in flight", describe_ranges(.0))]
    Cancelled(Vec<PartitionRange>),

    /// The final drain did not finish within the shutdown timeout.
    #[error("Shutdown timed out with uncommitted {}", describe_ranges(.uncommitted))]
    ShutdownTimedOut { uncommitted: Vec<PartitionRange> },
}

impl IngestError {
    /// Create a Kafka error.
    pub fn kafka(msg: impl Into<String>) -> Self {
        Self::KafkaError(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<rdkafka::error::KafkaError> for IngestError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::KafkaError(err.to_string())
    }
}
