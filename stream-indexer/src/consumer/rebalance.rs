//! Kafka client context that forwards rebalances to the consumer loop.

use rdkafka::consumer::{ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::{ClientContext, TopicPartitionList};
use stream_indexer_shared::TopicPartition;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::consumer::messages::RebalanceEvent;

/// Consumer context queuing rebalance notifications.
///
/// The callbacks run on the client's polling thread and must not block, so
/// they only push events onto an unbounded channel drained by the loop.
pub struct RebalanceContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
}

impl RebalanceContext {
    pub fn new(events: mpsc::UnboundedSender<RebalanceEvent>) -> Self {
        Self { events }
    }

    fn send(&self, event: RebalanceEvent) {
        if let Err(e) = self.events.send(event) {
            error!(error = %e, "Failed to queue rebalance event");
        }
    }
}

fn partitions(list: &TopicPartitionList) -> Vec<TopicPartition> {
    list.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Revoke(list) => {
                if list.count() == 0 {
                    debug!("Skipping empty revoke");
                    return;
                }
                let revoked = partitions(list);
                info!(partitions = ?revoked, "Partitions revoked");
                self.send(RebalanceEvent::Revoked(revoked));
            }
            Rebalance::Assign(list) => {
                debug!(count = list.count(), "Pre-rebalance assign");
            }
            Rebalance::Error(e) => {
                error!(error = %e, "Rebalance error");
            }
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        if let Rebalance::Assign(list) = rebalance {
            if list.count() == 0 {
                debug!("Skipping empty assign");
                return;
            }
            let assigned = partitions(list);
            info!(partitions = ?assigned, "Partitions assigned");
            self.send(RebalanceEvent::Assigned(assigned));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "Offsets committed"),
            Err(e) => warn!(error = %e, "Offset commit failed"),
        }
    }
}
