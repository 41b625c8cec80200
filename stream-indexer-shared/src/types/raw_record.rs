//! Raw records as read from the broker.

use crate::types::index_document::RecordPosition;
use crate::types::partition::TopicPartition;

/// A record exactly as it was read from the broker.
///
/// Records are immutable once read; the decoder borrows them and produces an
/// [`IndexDocument`](crate::IndexDocument) that keeps a [`RecordPosition`]
/// back to the record for traceability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Record key, absent for keyless records.
    pub key: Option<Vec<u8>>,
    /// Record payload. Empty for tombstones.
    pub value: Vec<u8>,
    /// Broker timestamp in milliseconds since the epoch, if the broker set one.
    pub timestamp: Option<i64>,
}

impl RawRecord {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        timestamp: Option<i64>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value: value.into(),
            timestamp,
        }
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    pub fn position(&self) -> RecordPosition {
        RecordPosition {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
            timestamp: self.timestamp,
        }
    }
}
