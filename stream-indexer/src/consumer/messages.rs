//! Messages passed from the Kafka client to the consumer loop.

use stream_indexer_shared::{RawRecord, TopicPartition};

/// A partition assignment change reported by the consumer group.
///
/// Produced inside the Kafka client callbacks and delivered to the consumer
/// loop in poll order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions now owned by this consumer.
    Assigned(Vec<TopicPartition>),
    /// Partitions about to be handed to another member.
    Revoked(Vec<TopicPartition>),
}

/// One item returned by a poll, in the order the client observed it.
///
/// A record that precedes a `Revoked` event for its partition was fetched
/// under the old assignment; one that follows an `Assigned` event was fetched
/// from the group's committed position.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Record(RawRecord),
    Rebalance(RebalanceEvent),
}

impl SourceEvent {
    pub fn as_record(&self) -> Option<&RawRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Rebalance(_) => None,
        }
    }
}
