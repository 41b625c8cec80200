//! Kafka consumer implementation for the stream indexer.
//!
//! Reads raw records from Kafka topics and commits offsets only when the
//! consumer loop hands over a commit point.

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    message::{BorrowedMessage, Message as KafkaMessage},
    Offset, TopicPartitionList,
};
use std::sync::Arc;
use std::time::Duration;
use stream_indexer_shared::{RawRecord, TopicPartition};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::consumer::messages::{RebalanceEvent, SourceEvent};
use crate::consumer::rebalance::RebalanceContext;
use crate::consumer::RecordSource;
use crate::errors::IngestError;

/// Default Kafka session timeout in milliseconds.
const DEFAULT_SESSION_TIMEOUT_MS: &str = "6000";

/// Connection and group settings of the consumer.
#[derive(Debug, Clone)]
pub struct KafkaConsumerConfig {
    /// Kafka broker addresses (comma-separated)
    pub brokers: String,
    pub group_id: String,
    pub topics: Vec<String>,
    /// Where to start when the group has no committed offset
    /// (`earliest` or `latest`).
    pub auto_offset_reset: String,
    /// SASL username (enables SASL/SSL if set)
    pub username: Option<String>,
    /// SASL password (required if username is set)
    pub password: Option<String>,
    /// Custom CA certificate in PEM format
    pub ssl_ca_pem: Option<String>,
}

impl KafkaConsumerConfig {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", DEFAULT_SESSION_TIMEOUT_MS);

        // SASL/SSL for managed Kafka, plaintext otherwise
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);

            if let Some(ca_pem) = &self.ssl_ca_pem {
                config.set("ssl.ca.pem", ca_pem);
            }
        }

        config
    }
}

/// Kafka consumer for raw JSON records.
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer<RebalanceContext>>,
    topics: Vec<String>,
    rebalances: mpsc::UnboundedReceiver<RebalanceEvent>,
}

impl KafkaConsumer {
    /// Create a new Kafka consumer.
    ///
    /// Auto-commit and the automatic offset store are disabled: offsets only
    /// move through [`RecordSource::commit`].
    ///
    /// # Returns
    ///
    /// * `Ok(KafkaConsumer)` - A new consumer instance
    /// * `Err(IngestError)` - If consumer creation fails
    pub fn new(config: &KafkaConsumerConfig) -> Result<Self, IngestError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let consumer: StreamConsumer<RebalanceContext> = config
            .client_config()
            .create_with_context(RebalanceContext::new(tx))
            .map_err(|e| IngestError::kafka(e.to_string()))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            auto_offset_reset = %config.auto_offset_reset,
            sasl = config.username.is_some(),
            "Created Kafka consumer"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topics: config.topics.clone(),
            rebalances: rx,
        })
    }

    fn to_record(msg: &BorrowedMessage<'_>) -> RawRecord {
        RawRecord::new(
            msg.topic(),
            msg.partition(),
            msg.offset(),
            msg.key().map(<[u8]>::to_vec),
            msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            msg.timestamp().to_millis(),
        )
    }
}

/// Move rebalance notifications queued by the client callbacks into `events`.
fn drain_rebalances(
    rebalances: &mut mpsc::UnboundedReceiver<RebalanceEvent>,
    events: &mut Vec<SourceEvent>,
) {
    while let Ok(event) = rebalances.try_recv() {
        events.push(SourceEvent::Rebalance(event));
    }
}

fn commit_list(offsets: &[(TopicPartition, i64)]) -> Result<TopicPartitionList, IngestError> {
    let mut tpl = TopicPartitionList::new();
    for (partition, commit_point) in offsets {
        tpl.add_partition_offset(
            &partition.topic,
            partition.partition,
            Offset::Offset(*commit_point),
        )
        .map_err(|e| IngestError::kafka(e.to_string()))?;
    }
    Ok(tpl)
}

/// Run a blocking client call on the blocking pool so other loops sharing the
/// runtime keep going.
async fn run_blocking<T, F>(call: F) -> Result<T, IngestError>
where
    F: FnOnce() -> Result<T, KafkaError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(join_err) => Err(IngestError::kafka(format!(
            "Blocking Kafka call did not complete: {}",
            join_err
        ))),
    }
}

#[async_trait]
impl RecordSource for KafkaConsumer {
    /// Subscribe to configured topics.
    fn subscribe(&mut self) -> Result<(), IngestError> {
        let topics: Vec<&str> = self.topics.iter().map(|s| s.as_str()).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| IngestError::kafka(e.to_string()))?;

        info!(topics = ?self.topics, "Subscribed to Kafka topics");
        Ok(())
    }

    /// Wait for the first record until `timeout`, then take whatever else is
    /// already buffered, up to `max_records`.
    ///
    /// Rebalance callbacks run inside `recv`, so notifications drained right
    /// after a `recv` returns are placed before the record it returned.
    #[instrument(skip(self))]
    async fn poll(
        &mut self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<SourceEvent>, IngestError> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        let mut received = 0;

        drain_rebalances(&mut self.rebalances, &mut events);

        while received < max_records {
            let wait = if received == 0 {
                deadline.saturating_duration_since(Instant::now())
            } else {
                Duration::ZERO
            };

            match tokio::time::timeout(wait, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(msg)) => {
                    let record = Self::to_record(&msg);
                    drain_rebalances(&mut self.rebalances, &mut events);
                    events.push(SourceEvent::Record(record));
                    received += 1;
                }
                Ok(Err(e)) if events.is_empty() => return Err(e.into()),
                Ok(Err(e)) => {
                    warn!(error = %e, received = received, "Kafka error after partial poll");
                    break;
                }
            }
        }

        drain_rebalances(&mut self.rebalances, &mut events);

        if received > 0 {
            info!(count = received, "Received records");
        }
        Ok(events)
    }

    /// Commit offsets synchronously on the blocking pool.
    async fn commit(&mut self, offsets: &[(TopicPartition, i64)]) -> Result<(), IngestError> {
        if offsets.is_empty() {
            return Ok(());
        }

        let tpl = commit_list(offsets)?;
        let consumer = Arc::clone(&self.consumer);
        run_blocking(move || consumer.commit(&tpl, CommitMode::Sync)).await?;

        for (partition, commit_point) in offsets {
            debug!(partition = %partition, offset = commit_point, "Committed offset");
        }
        info!(partitions = offsets.len(), "Offsets have been committed");
        Ok(())
    }
}
