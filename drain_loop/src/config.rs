use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use crate::errors::{DrainError, Result};

const EMBEDDED_DEFAULTS: &str = include_str!("../config/default.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub redis: Option<RedisServerConfig>,
    #[serde(default)]
    pub valkey: Option<RedisServerConfig>,
    pub name: String,
    pub group: String,
    pub consumer: String,
    #[serde(default = "default_read_count")]
    pub read_count: usize,
    #[serde(default = "default_block_ms")]
    pub block_ms: usize,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamBackend {
    Redis,
    Valkey,
}

impl StreamConfig {
    pub fn resolve(&self) -> Result<(StreamBackend, stream_buffer::RedisConnectionConfig)> {
        match (&self.redis, &self.valkey) {
            (Some(r), None) => Ok((StreamBackend::Redis, r.to_connection())),
            (None, Some(v)) => Ok((StreamBackend::Valkey, v.to_connection())),
            (Some(_), Some(_)) => Err(DrainError::Config(
                "stream: exactly one of redis or valkey must be configured, not both".to_string(),
            )),
            (None, None) => Err(DrainError::Config(
                "stream: exactly one of redis or valkey must be configured".to_string(),
            )),
        }
    }
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

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub endpoint: Option<String>,
    pub table_name: String,
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    #[serde(default = "default_retry_wait_max_ms")]
    pub retry_wait_max_ms: u64,
}

/// Disabled-by-default opt-in TTL reaper (design note open question 3):
/// the core drain cycle never calls `Delete`, so entries accumulate in the
/// stream until something prunes them. This config lets an operator turn
/// that pruning on without touching the cycle itself.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_reaper_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_secs: default_reaper_max_age_secs(),
        }
    }
}

fn default_read_count() -> usize {
    50
}
fn default_block_ms() -> usize {
    5_000
}
fn default_interval_ms() -> u64 {
    2_000
}
fn default_retry_max() -> u32 {
    5
}
fn default_retry_wait_max_ms() -> u64 {
    20_000
}
fn default_reaper_max_age_secs() -> u64 {
    7 * 24 * 3600
}

impl Config {
    pub fn load() -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(EMBEDDED_DEFAULTS, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("DRAIN_LOOP")
                    .separator("_")
                    .try_parsing(true),
            );

        let config: Config = builder
            .build()
            .map_err(|e| DrainError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| DrainError::Config(e.to_string()))?;

        config.stream.resolve()?;

        Ok(config)
    }
}
