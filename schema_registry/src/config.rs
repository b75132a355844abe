use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{RegistryError, Result};

const EMBEDDED_DEFAULTS: &str = include_str!("../config/default.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryBackend {
    Redis,
    Valkey,
}

/// Exactly one of `redis`/`valkey` must be set, matching the original's
/// `required_without=Valkey`/`required_without=Redis` pairing.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub redis: Option<RedisServerConfig>,
    #[serde(default)]
    pub valkey: Option<RedisServerConfig>,
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

impl RepositoryConfig {
    pub fn resolve(&self) -> Result<(RepositoryBackend, RedisServerConfig)> {
        match (&self.redis, &self.valkey) {
            (Some(r), None) => Ok((RepositoryBackend::Redis, r.clone())),
            (None, Some(v)) => Ok((RepositoryBackend::Valkey, v.clone())),
            (Some(_), Some(_)) => Err(RegistryError::Config(
                "repository: exactly one of redis or valkey must be configured, not both".to_string(),
            )),
            (None, None) => Err(RegistryError::Config(
                "repository: exactly one of redis or valkey must be configured".to_string(),
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

impl Config {
    pub fn load() -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(EMBEDDED_DEFAULTS, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("SCHEMA_REGISTRY")
                    .separator("_")
                    .try_parsing(true),
            );

        let config: Config = builder
            .build()
            .map_err(|e| RegistryError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| RegistryError::Config(e.to_string()))?;

        config.repository.resolve()?;

        Ok(config)
    }
}
