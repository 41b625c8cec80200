//! Offset tracker - highest fully resolved offset per partition.
//!
//! The tracker only moves forward. It is owned by a single consumer loop and
//! fed after the index writer has resolved every document of a batch, so any
//! value it reports is safe to commit.

use std::collections::HashMap;

use stream_indexer_shared::TopicPartition;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct PartitionState {
    /// Highest offset whose record is indexed or deliberately skipped.
    checkpoint: i64,
    /// Last checkpoint acknowledged by the broker.
    committed: Option<i64>,
}

/// Per-partition checkpoint map.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<TopicPartition, PartitionState>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that everything up to `offset` is resolved for `partition`.
    ///
    /// Returns `false` when `offset` does not advance the checkpoint; the
    /// stored value is left untouched in that case.
    pub fn record(&mut self, partition: &TopicPartition, offset: i64) -> bool {
        match self.partitions.get_mut(partition) {
            Some(state) if offset <= state.checkpoint => {
                warn!(
                    partition = %partition,
                    offset = offset,
                    checkpoint = state.checkpoint,
                    "Ignoring offset below the current checkpoint"
                );
                false
            }
            Some(state) => {
                state.checkpoint = offset;
                true
            }
            None => {
                self.partitions.insert(
                    partition.clone(),
                    PartitionState {
                        checkpoint: offset,
                        committed: None,
                    },
                );
                true
            }
        }
    }

    /// Highest resolved offset of `partition`.
    pub fn checkpoint(&self, partition: &TopicPartition) -> Option<i64> {
        self.partitions.get(partition).map(|state| state.checkpoint)
    }

    /// The offset handed to the broker: the next offset to read.
    pub fn commit_point(&self, partition: &TopicPartition) -> Option<i64> {
        self.checkpoint(partition).map(|checkpoint| checkpoint + 1)
    }

    /// Commit points not yet acknowledged by the broker, ordered by partition.
    pub fn pending_commits(&self) -> Vec<(TopicPartition, i64)> {
        let mut pending: Vec<(TopicPartition, i64)> = self
            .partitions
            .iter()
            .filter(|(_, state)| state.committed != Some(state.checkpoint))
            .map(|(partition, state)| (partition.clone(), state.checkpoint + 1))
            .collect();
        pending.sort();
        pending
    }

    /// Acknowledge commit points returned by [`Self::pending_commits`].
    pub fn mark_committed(&mut self, commits: &[(TopicPartition, i64)]) {
        for (partition, commit_point) in commits {
            if let Some(state) = self.partitions.get_mut(partition) {
                let checkpoint = commit_point - 1;
                if state.committed.map_or(true, |c| c < checkpoint) {
                    state.committed = Some(checkpoint);
                }
                debug!(partition = %partition, commit_point = commit_point, "Commit acknowledged");
            }
        }
    }

    /// Forget a partition that is no longer assigned to this consumer.
    pub fn revoke(&mut self, partition: &TopicPartition) {
        if let Some(state) = self.partitions.remove(partition) {
            info!(
                partition = %partition,
                checkpoint = state.checkpoint,
                "Dropped offset state of revoked partition"
            );
        }
    }

    /// Partitions with a checkpoint.
    pub fn partitions(&self) -> Vec<TopicPartition> {
        let mut partitions: Vec<TopicPartition> = self.partitions.keys().cloned().collect();
        partitions.sort();
        partitions
    }
}
