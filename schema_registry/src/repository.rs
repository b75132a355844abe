use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::AsyncCommands;

use crate::config::RedisServerConfig;
use crate::semver::Semver;

/// Plain key/value storage for registered schema bodies — not the stream
/// API `stream_buffer` exposes, the same distinction the original registry
/// draws between its `repository` package and `stream-buffer`.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), redis::RedisError>;
    async fn get(&self, key: &str) -> Result<Option<String>, redis::RedisError>;
    async fn del(&self, key: &str) -> Result<(), redis::RedisError>;
}

/// Either connection type implements `ConnectionLike`, so both get
/// `AsyncCommands` for free — this just picks which one a call goes
/// through, mirroring the original's `IsCluster` branch at construction.
enum RedisConn {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

pub struct RedisRepository {
    conn: RedisConn,
}

impl RedisRepository {
    pub async fn connect(server: &RedisServerConfig) -> Result<Self, redis::RedisError> {
        let url = match (&server.username, &server.password) {
            (Some(u), Some(p)) => format!("redis://{u}:{p}@{}", server.address),
            (None, Some(p)) => format!("redis://:{p}@{}", server.address),
            _ => format!("redis://{}", server.address),
        };

        let conn = if server.is_cluster {
            let mut builder = ClusterClientBuilder::new(vec![url]);
            if let Some(name) = &server.client_name {
                builder = builder.client_name(name.clone());
            }
            RedisConn::Cluster(builder.build()?.get_async_connection().await?)
        } else {
            let client = redis::Client::open(url)?;
            RedisConn::Single(ConnectionManager::new(client).await?)
        };

        Ok(Self { conn })
    }
}

#[async_trait]
impl Repository for RedisRepository {
    async fn set(&self, key: &str, value: &str) -> Result<(), redis::RedisError> {
        match &self.conn {
            RedisConn::Single(c) => c.clone().set(key, value).await,
            RedisConn::Cluster(c) => c.clone().set(key, value).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        match &self.conn {
            RedisConn::Single(c) => c.clone().get(key).await,
            RedisConn::Cluster(c) => c.clone().get(key).await,
        }
    }

    async fn del(&self, key: &str) -> Result<(), redis::RedisError> {
        let deleted: usize = match &self.conn {
            RedisConn::Single(c) => c.clone().del(key).await?,
            RedisConn::Cluster(c) => c.clone().del(key).await?,
        };
        let _ = deleted;
        Ok(())
    }
}

const KEY_PREFIX: &str = "schema";
const KEY_SEPARATOR: &str = ":";

/// `{keyPrefix}{keySeparator}{name}{keySeparator}{MAJOR.MINOR.PATCH}`
pub fn schema_key(name: &str, version: &Semver) -> String {
    format!("{KEY_PREFIX}{KEY_SEPARATOR}{name}{KEY_SEPARATOR}{version}")
}
