//! Indexer settings read from environment variables.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use stream_indexer_repository::{IndexConfig, IndexNaming};

use crate::batcher::{BatchConfig, DEFAULT_MAX_BYTES, DEFAULT_MAX_DOCS, DEFAULT_MAX_LATENCY_MS};
use crate::consumer::KafkaConsumerConfig;
use crate::loader::{
    PermanentFailurePolicy, RetryPolicy, DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_BACKOFF_MS,
};
use crate::orchestrator::{
    OrchestratorConfig, DEFAULT_MAX_POLL_RECORDS, DEFAULT_POLL_TIMEOUT_MS,
    DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use crate::processor::DocumentIdStrategy;
use crate::IndexingError;

/// Default OpenSearch URL.
const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";

/// Default Kafka broker address.
const DEFAULT_KAFKA_BROKER: &str = "localhost:9092";

/// Default Kafka topic.
const DEFAULT_KAFKA_TOPICS: &str = "wikimedia_recentchange";

/// Default Kafka consumer group ID.
const DEFAULT_KAFKA_GROUP_ID: &str = "consumer-opensearch";

/// Default offset reset policy for groups without committed offsets.
const DEFAULT_AUTO_OFFSET_RESET: &str = "latest";

/// Default index name.
const DEFAULT_INDEX_NAME: &str = "wikimedia";

/// Default connection retry interval in seconds.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

/// Connection mode for OpenSearch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry connection at a fixed interval until successful.
    Retry,
}

impl FromStr for ConnectionMode {
    type Err = String;

    /// Valid values: "fail-fast" or "retry" (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Ok(Self::FailFast),
            "retry" => Ok(Self::Retry),
            other => Err(format!(
                "Unknown connection mode '{}', expected 'fail-fast' or 'retry'",
                other
            )),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT`. Anything other than `json` means pretty output.
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT") {
            Ok(value) if value.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Everything the indexer needs to start.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub kafka: KafkaConsumerConfig,
    pub opensearch_url: String,
    pub opensearch_credentials: Option<(String, String)>,
    pub connection_mode: ConnectionMode,
    pub connection_retry_interval: Duration,
    pub index: IndexConfig,
    pub id_strategy: DocumentIdStrategy,
    pub batch: BatchConfig,
    pub retry: RetryPolicy,
    pub permanent_failure_policy: PermanentFailurePolicy,
    pub orchestrator: OrchestratorConfig,
    /// Number of consumer loops in this process.
    pub workers: usize,
}

impl IndexerConfig {
    /// Load the configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KAFKA_BROKER`: Kafka broker address (default: localhost:9092)
    /// - `KAFKA_TOPICS`: Comma separated topics (default: wikimedia_recentchange)
    /// - `KAFKA_GROUP_ID`: Consumer group ID (default: consumer-opensearch)
    /// - `KAFKA_AUTO_OFFSET_RESET`: `earliest` or `latest` (default: latest)
    /// - `KAFKA_USERNAME` / `KAFKA_PASSWORD` / `KAFKA_SSL_CA_PEM`: SASL/SSL settings
    /// - `KAFKA_POLL_TIMEOUT_MS`: Poll timeout (default: 3000)
    /// - `KAFKA_FETCH_MAX_RECORDS`: Records per poll (default: 500)
    /// - `BATCH_MAX_DOCS` / `BATCH_MAX_BYTES` / `BATCH_MAX_LATENCY_MS`: Flush bounds
    /// - `OPENSEARCH_URL`: OpenSearch server URL (default: http://localhost:9200)
    /// - `OPENSEARCH_USERNAME` / `OPENSEARCH_PASSWORD`: Basic auth credentials
    /// - `OPENSEARCH_CONNECTION_MODE`: "fail-fast" or "retry" (default: retry)
    /// - `OPENSEARCH_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    /// - `INDEX_NAME` / `INDEX_NAMING` / `INDEX_SHARDS` / `INDEX_REPLICAS`: Target index
    /// - `DOCUMENT_ID_STRATEGY`: `field:<pointer>`, `key`, `coordinates` or `hash`
    /// - `RETRY_MAX_ATTEMPTS` / `RETRY_BACKOFF_MS` / `RETRY_MAX_BACKOFF_MS`: Retry policy
    /// - `PERMANENT_FAILURE_POLICY`: `skip` or `halt` (default: skip)
    /// - `SHUTDOWN_TIMEOUT_MS`: Bound on the final drain (default: 30000)
    /// - `INDEXER_WORKERS`: Consumer loops per process (default: 1)
    pub fn from_env() -> Result<Self, IndexingError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IndexingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let topics: Vec<String> = string_or("KAFKA_TOPICS", DEFAULT_KAFKA_TOPICS)
            .split(',')
            .map(|topic| topic.trim().to_string())
            .filter(|topic| !topic.is_empty())
            .collect();
        if topics.is_empty() {
            return Err(IndexingError::config("KAFKA_TOPICS must name at least one topic"));
        }

        let auto_offset_reset = string_or("KAFKA_AUTO_OFFSET_RESET", DEFAULT_AUTO_OFFSET_RESET)
            .to_lowercase();
        if !matches!(auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(IndexingError::config(format!(
                "KAFKA_AUTO_OFFSET_RESET must be 'earliest' or 'latest', got '{}'",
                auto_offset_reset
            )));
        }

        let kafka = KafkaConsumerConfig {
            brokers: string_or("KAFKA_BROKER", DEFAULT_KAFKA_BROKER),
            group_id: string_or("KAFKA_GROUP_ID", DEFAULT_KAFKA_GROUP_ID),
            topics,
            auto_offset_reset,
            username: get("KAFKA_USERNAME"),
            password: get("KAFKA_PASSWORD"),
            ssl_ca_pem: get("KAFKA_SSL_CA_PEM"),
        };

        let batch = BatchConfig {
            max_docs: positive(&get, "BATCH_MAX_DOCS", DEFAULT_MAX_DOCS)?,
            max_bytes: positive(&get, "BATCH_MAX_BYTES", DEFAULT_MAX_BYTES)?,
            max_latency: Duration::from_millis(positive(
                &get,
                "BATCH_MAX_LATENCY_MS",
                DEFAULT_MAX_LATENCY_MS,
            )?),
        };

        let initial_backoff = parse_or(&get, "RETRY_BACKOFF_MS", DEFAULT_BACKOFF_MS)?;
        let max_backoff = parse_or(&get, "RETRY_MAX_BACKOFF_MS", DEFAULT_MAX_BACKOFF_MS)?;
        if max_backoff < initial_backoff {
            return Err(IndexingError::config(format!(
                "RETRY_MAX_BACKOFF_MS ({}) must not be lower than RETRY_BACKOFF_MS ({})",
                max_backoff, initial_backoff
            )));
        }
        let retry = RetryPolicy::new(
            positive(&get, "RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            Duration::from_millis(initial_backoff),
            Duration::from_millis(max_backoff),
        );

        let naming: IndexNaming = parse_or(&get, "INDEX_NAMING", IndexNaming::Fixed)?;
        let index = IndexConfig::new(string_or("INDEX_NAME", DEFAULT_INDEX_NAME))
            .with_naming(naming)
            .with_shards(
                positive(&get, "INDEX_SHARDS", 1)?,
                parse_or(&get, "INDEX_REPLICAS", 1)?,
            );

        let opensearch_credentials = match (get("OPENSEARCH_USERNAME"), get("OPENSEARCH_PASSWORD")) {
            (Some(username), Some(password)) => Some((username, password)),
            (None, None) => None,
            _ => {
                return Err(IndexingError::config(
                    "OPENSEARCH_USERNAME and OPENSEARCH_PASSWORD must be set together",
                ))
            }
        };

        let orchestrator = OrchestratorConfig {
            poll_timeout: Duration::from_millis(positive(
                &get,
                "KAFKA_POLL_TIMEOUT_MS",
                DEFAULT_POLL_TIMEOUT_MS,
            )?),
            max_poll_records: positive(&get, "KAFKA_FETCH_MAX_RECORDS", DEFAULT_MAX_POLL_RECORDS)?,
            shutdown_timeout: Duration::from_millis(positive(
                &get,
                "SHUTDOWN_TIMEOUT_MS",
                DEFAULT_SHUTDOWN_TIMEOUT_MS,
            )?),
            ..OrchestratorConfig::default()
        };

        Ok(Self {
            kafka,
            opensearch_url: string_or("OPENSEARCH_URL", DEFAULT_OPENSEARCH_URL),
            opensearch_credentials,
            connection_mode: parse_or(&get, "OPENSEARCH_CONNECTION_MODE", ConnectionMode::Retry)?,
            connection_retry_interval: Duration::from_secs(parse_or(
                &get,
                "OPENSEARCH_RETRY_INTERVAL_SECS",
                DEFAULT_RETRY_INTERVAL_SECS,
            )?),
            index,
            id_strategy: parse_or(&get, "DOCUMENT_ID_STRATEGY", DocumentIdStrategy::default())?,
            batch,
            retry,
            permanent_failure_policy: parse_or(
                &get,
                "PERMANENT_FAILURE_POLICY",
                PermanentFailurePolicy::Skip,
            )?,
            orchestrator,
            workers: positive(&get, "INDEXER_WORKERS", 1)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, IndexingError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| IndexingError::config(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

fn positive<T, G>(get: &G, key: &str, default: T) -> Result<T, IndexingError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if value <= T::default() {
        return Err(IndexingError::config(format!("{} must be greater than zero", key)));
    }
    Ok(value)
}
