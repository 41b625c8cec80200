//! Partition and offset coordinates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single partition of a topic.
///
/// Offsets are only meaningful relative to one `TopicPartition`, so every
/// per-partition structure in the indexer is keyed by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// Inclusive range of offsets within one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRange {
    pub first: i64,
    pub last: i64,
}

impl OffsetRange {
    /// A range covering exactly one offset.
    pub fn single(offset: i64) -> Self {
        Self {
            first: offset,
            last: offset,
        }
    }

    /// Widen the range so that it also covers `offset`.
    pub fn extend(&mut self, offset: i64) {
        self.first = self.first.min(offset);
        self.last = self.last.max(offset);
    }
}

/// An offset range tagged with its partition, used in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    pub partition: TopicPartition,
    pub range: OffsetRange,
}

impl fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.range.first == self.range.last {
            write!(f, "{} offset {}", self.partition, self.range.first)
        } else {
            write!(
                f,
                "{} offsets {}..={}",
                self.partition, self.range.first, self.range.last
            )
        }
    }
}

/// Render a list of ranges as a single comma separated line.
pub fn describe_ranges(ranges: &[PartitionRange]) -> String {
    if ranges.is_empty() {
        return "no partitions".to_string();
    }
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
