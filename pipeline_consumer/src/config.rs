use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use crate::errors::{ConsumerError, Result};

const EMBEDDED_DEFAULTS: &str = include_str!("../config/default.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    /// Upper bound on concurrent per-message operations (the B fan-out's
    /// wait-all barrier inside a single partition worker batch).
    #[serde(default = "default_max_process_routines")]
    pub max_process_routines: usize,
    /// Per-partition drain budget on revoke, in milliseconds.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topics: Vec<String>,
    pub group_id: String,
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
    #[serde(default = "default_channel_size")]
    pub partition_records_channel_size: usize,
}

/// `repository.{redis|valkey}.*` + `repository.stream.*` — exactly one of
/// `redis`/`valkey` must be set, matching the original's
/// `required_without=Valkey`/`required_without=Redis` pairing.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub redis: Option<RedisServerConfig>,
    #[serde(default)]
    pub valkey: Option<RedisServerConfig>,
    pub stream: RepositoryStreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisServerConfig {
    pub address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub is_cluster: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryStreamConfig {
    pub name: String,
    pub group: String,
    pub consumer: String,
    #[serde(default = "default_read_count")]
    pub read_count: usize,
    #[serde(default = "default_block_ms")]
    pub block_ms: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamBackend {
    Redis,
    Valkey,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SchemaConfig {
    #[serde(default)]
    pub registry_url: Option<String>,
    /// Base URI a relative `$ref` is resolved against.
    #[serde(default)]
    pub default_base_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_poll_records() -> usize {
    500
}

fn default_channel_size() -> usize {
    16
}

fn default_read_count() -> usize {
    50
}

fn default_block_ms() -> usize {
    5_000
}

fn default_max_process_routines() -> usize {
    8
}

fn default_close_timeout_ms() -> u64 {
    30_000
}

impl Config {
    /// Embedded YAML defaults, layered with `PIPELINE_CONSUMER_<PATH>`
    /// environment overrides (`_` in the env var name maps to `.` in the
    /// config path, e.g. `PIPELINE_CONSUMER_KAFKA_BROKERS`).
    pub fn load() -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(EMBEDDED_DEFAULTS, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("PIPELINE_CONSUMER")
                    .separator("_")
                    .try_parsing(true),
            );

        let config: Config = builder
            .build()
            .map_err(|e| ConsumerError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConsumerError::Config(e.to_string()))?;

        if config.max_process_routines == 0 {
            return Err(ConsumerError::Config(
                "maxProcessRoutines must be greater than 0".to_string(),
            ));
        }
        if config.kafka.max_poll_records == 0 {
            return Err(ConsumerError::Config(
                "maxPollRecords must be greater than 0".to_string(),
            ));
        }
        if config.kafka.partition_records_channel_size < 5 {
            return Err(ConsumerError::Config(
                "partitionRecordsChannelSize must be at least 5".to_string(),
            ));
        }
        config.repository.resolve()?;

        Ok(config)
    }
}

impl RepositoryConfig {
    /// Exactly one of `redis`/`valkey` must be configured; returns which
    /// backend it is and the connection parameters to reach it.
    pub fn resolve(&self) -> Result<(StreamBackend, stream_buffer::RedisConnectionConfig)> {
        match (&self.redis, &self.valkey) {
            (Some(r), None) => Ok((StreamBackend::Redis, r.to_connection())),
            (None, Some(v)) => Ok((StreamBackend::Valkey, v.to_connection())),
            (Some(_), Some(_)) => Err(ConsumerError::Config(
                "repository: exactly one of redis or valkey must be configured, not both".to_string(),
            )),
            (None, None) => Err(ConsumerError::Config(
                "repository: exactly one of redis or valkey must be configured".to_string(),
            )),
        }
    }
}

impl RedisServerConfig {
    fn to_connection(&self) -> stream_buffer::RedisConnectionConfig {
        stream_buffer::RedisConnectionConfig {
            address: self.address.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            client_name: self.client_name.clone(),
            is_cluster: self.is_cluster,
        }
    }
}
