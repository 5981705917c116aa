//! Pipeline configuration from environment variables

use std::env;

/// Configuration for the ingestion + aggregation pipeline
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Source endpoint base URL (randomuser.me-compatible)
    pub source_url: String,

    /// Max records requested per source fetch
    pub batch_size_limit: usize,

    /// Ingestor tick cadence in seconds
    pub poll_interval_seconds: u64,

    /// SQLite path of the durable queue
    pub queue_bootstrap_address: String,

    /// Number of topic partitions (must stay stable across restarts)
    pub queue_partitions: u32,

    /// SQLite path of the raw store (and dead-letter sink)
    pub raw_store_endpoint: String,

    /// SQLite path of the aggregate store (and checkpoints)
    pub aggregate_store_endpoint: String,

    /// Max queue messages per consumer fetch
    pub fetch_max_messages: usize,

    /// Consumer poll interval when the queue is empty, in milliseconds
    pub consume_idle_ms: u64,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Numeric variables must parse when set; a garbled value is a
/// `ConfigError`, never a silent fallback to the default.
fn numeric_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} must be a number, got '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `SOURCE_URL` (default: https://randomuser.me/api/)
    /// - `BATCH_SIZE_LIMIT` (default: 10)
    /// - `POLL_INTERVAL_SECONDS` (default: 10)
    /// - `QUEUE_BOOTSTRAP_ADDRESS` (default: data/queue.db)
    /// - `QUEUE_PARTITIONS` (default: 1)
    /// - `RAW_STORE_ENDPOINT` (default: data/raw_store.db)
    /// - `AGGREGATE_STORE_ENDPOINT` (default: data/aggregate_store.db)
    /// - `FETCH_MAX_MESSAGES` (default: 16)
    /// - `CONSUME_IDLE_MS` (default: 500)
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            source_url: env::var("SOURCE_URL")
                .unwrap_or_else(|_| "https://randomuser.me/api/".to_string()),

            batch_size_limit: numeric_var("BATCH_SIZE_LIMIT", 10)?,

            poll_interval_seconds: numeric_var("POLL_INTERVAL_SECONDS", 10)?,

            queue_bootstrap_address: env::var("QUEUE_BOOTSTRAP_ADDRESS")
                .unwrap_or_else(|_| "data/queue.db".to_string()),

            queue_partitions: numeric_var("QUEUE_PARTITIONS", 1)?,

            raw_store_endpoint: env::var("RAW_STORE_ENDPOINT")
                .unwrap_or_else(|_| "data/raw_store.db".to_string()),

            aggregate_store_endpoint: env::var("AGGREGATE_STORE_ENDPOINT")
                .unwrap_or_else(|_| "data/aggregate_store.db".to_string()),

            fetch_max_messages: numeric_var("FETCH_MAX_MESSAGES", 16)?,

            consume_idle_ms: numeric_var("CONSUME_IDLE_MS", 500)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_INTERVAL_SECONDS must be at least 1".to_string(),
            ));
        }

        if self.queue_partitions == 0 {
            return Err(ConfigError::InvalidValue(
                "QUEUE_PARTITIONS must be at least 1".to_string(),
            ));
        }

        if self.batch_size_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "BATCH_SIZE_LIMIT must be at least 1".to_string(),
            ));
        }

        if self.fetch_max_messages == 0 {
            return Err(ConfigError::InvalidValue(
                "FETCH_MAX_MESSAGES must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_url: "https://randomuser.me/api/".to_string(),
            batch_size_limit: 10,
            poll_interval_seconds: 10,
            queue_bootstrap_address: "data/queue.db".to_string(),
            queue_partitions: 1,
            raw_store_endpoint: "data/raw_store.db".to_string(),
            aggregate_store_endpoint: "data/aggregate_store.db".to_string(),
            fetch_max_messages: 16,
            consume_idle_ms: 500,
        }
    }
}
