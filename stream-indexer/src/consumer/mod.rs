//! Consumer module for the stream indexer ingest.
//!
//! Provides the record source abstraction and its Kafka implementation.

mod kafka_consumer;
mod messages;
mod rebalance;

pub use kafka_consumer::{KafkaConsumer, KafkaConsumerConfig};
pub use messages::{RebalanceEvent, SourceEvent};
pub use rebalance::RebalanceContext;

use std::time::Duration;

use async_trait::async_trait;
use stream_indexer_shared::TopicPartition;

use crate::errors::IngestError;

/// A partitioned log the consumer loop reads from and commits to.
///
/// Offsets are never committed on the source's own initiative: the loop
/// hands over commit points once the records below them are indexed.
#[async_trait]
pub trait RecordSource: Send {
    /// Join the consumer group for the configured topics.
    fn subscribe(&mut self) -> Result<(), IngestError>;

    /// Wait up to `timeout` for records and return at most `max_records`.
    ///
    /// Assignment changes observed while polling are interleaved with the
    /// records in the order they happened. An empty vector means nothing
    /// arrived before the timeout.
    async fn poll(
        &mut self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<SourceEvent>, IngestError>;

    /// Commit the next offset to read for each partition.
    async fn commit(&mut self, offsets: &[(TopicPartition, i64)]) -> Result<(), IngestError>;
}
