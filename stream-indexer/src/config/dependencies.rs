//! Dependency initialization and wiring for the stream indexer.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batcher::BatchAccumulator;
use crate::config::settings::{ConnectionMode, IndexerConfig};
use crate::consumer::KafkaConsumer;
use crate::loader::IndexWriter;
use crate::orchestrator::Orchestrator;
use crate::processor::RecordDecoder;
use crate::IndexingError;
use stream_indexer_repository::{IndexConfig, OpenSearchProvider, SearchIndexProvider};

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// One orchestrator per worker, all in the same consumer group.
    pub orchestrators: Vec<Orchestrator>,
}

impl Dependencies {
    /// Initialize all dependencies from the configuration.
    ///
    /// Connects to OpenSearch (retrying or failing fast per
    /// `connection_mode`), makes sure the target index exists, then builds
    /// one Kafka consumer and orchestrator per worker.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexingError)` - If initialization fails or `cancel` fires first
    pub async fn new(
        config: &IndexerConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, IndexingError> {
        info!(
            opensearch_url = %config.opensearch_url,
            kafka_broker = %config.kafka.brokers,
            kafka_group_id = %config.kafka.group_id,
            topics = ?config.kafka.topics,
            index = %config.index.name,
            connection_mode = ?config.connection_mode,
            workers = config.workers,
            "Initializing dependencies"
        );

        // Initialize OpenSearch provider with retry logic
        let search_provider = Self::connect_to_opensearch(
            &config.opensearch_url,
            config.index.clone(),
            config.opensearch_credentials.clone(),
            config.connection_mode,
            config.connection_retry_interval,
            cancel,
        )
        .await?;

        info!("OpenSearch connection established");

        // Exits if the index (or its template) cannot be created
        search_provider
            .ensure_index_exists()
            .await
            .map_err(|e| IndexingError::config(format!("Failed to ensure index exists: {}", e)))?;

        let provider: Arc<dyn SearchIndexProvider> = Arc::new(search_provider);

        let mut orchestrators = Vec::with_capacity(config.workers);
        for worker in 0..config.workers {
            let consumer = KafkaConsumer::new(&config.kafka).map_err(|e| {
                IndexingError::config(format!("Failed to create Kafka consumer: {}", e))
            })?;

            let writer = IndexWriter::new(
                Arc::clone(&provider),
                config.retry.clone(),
                config.permanent_failure_policy,
            );

            orchestrators.push(Orchestrator::new(
                Box::new(consumer),
                RecordDecoder::new(config.id_strategy.clone()),
                BatchAccumulator::new(config.batch.clone()),
                writer,
                config.orchestrator.clone(),
                cancel.child_token(),
            ));

            info!(worker = worker, "Kafka consumer created");
        }

        Ok(Self { orchestrators })
    }

    /// Connect to OpenSearch with retry logic based on connection mode.
    async fn connect_to_opensearch(
        url: &str,
        index_config: IndexConfig,
        credentials: Option<(String, String)>,
        mode: ConnectionMode,
        retry_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<OpenSearchProvider, IndexingError> {
        loop {
            match Self::try_connect_opensearch(url, index_config.clone(), credentials.clone())
                .await
            {
                Ok(provider) => return Ok(provider),
                Err(e) => match mode {
                    ConnectionMode::FailFast => {
                        return Err(IndexingError::config(format!(
                            "Failed to connect to OpenSearch: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            error = %e,
                            retry_interval_secs = retry_interval.as_secs(),
                            "Failed to connect to OpenSearch, retrying..."
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return Err(IndexingError::config(
                                    "Shutdown requested while connecting to OpenSearch",
                                ));
                            }
                            _ = tokio::time::sleep(retry_interval) => {}
                        }
                    }
                },
            }
        }
    }

    /// Attempt to connect to OpenSearch.
    async fn try_connect_opensearch(
        url: &str,
        index_config: IndexConfig,
        credentials: Option<(String, String)>,
    ) -> Result<OpenSearchProvider, IndexingError> {
        let search_provider = OpenSearchProvider::new(url, index_config, credentials).map_err(|e| {
            IndexingError::config(format!("Failed to create OpenSearch provider: {}", e))
        })?;

        search_provider
            .ping()
            .await
            .map_err(|e| IndexingError::config(format!("OpenSearch is not reachable: {}", e)))?;

        Ok(search_provider)
    }
}
