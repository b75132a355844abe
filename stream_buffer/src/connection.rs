//! Address/credential plumbing shared by `RedisStreamBuffer`'s single-node
//! and cluster connection paths — mirrors `repository.{redis|valkey}` in
//! the original's `config.Server`: one `address`, optional credentials, and
//! an `isCluster` switch between a plain client and a cluster client.

use redis::aio::ConnectionManager;
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::streams::{StreamAddOptions, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};

#[derive(Debug, Clone)]
pub struct RedisConnectionConfig {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_name: Option<String>,
    pub is_cluster: bool,
}

impl RedisConnectionConfig {
    fn node_url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => format!("redis://{u}:{p}@{}", self.address),
            (None, Some(p)) => format!("redis://:{p}@{}", self.address),
            _ => format!("redis://{}", self.address),
        }
    }

    pub async fn connect(&self) -> Result<RedisConn, RedisError> {
        if self.is_cluster {
            let mut builder = ClusterClientBuilder::new(vec![self.node_url()]);
            if let Some(name) = &self.client_name {
                builder = builder.client_name(name.clone());
            }
            let client = builder.build()?;
            let conn = client.get_async_connection().await?;
            Ok(RedisConn::Cluster(conn))
        } else {
            let client = redis::Client::open(self.node_url())?;
            let conn = ConnectionManager::new(client).await?;
            Ok(RedisConn::Single(conn))
        }
    }
}

/// Either connection type implements `ConnectionLike`, so both get
/// `AsyncCommands` via its blanket impl — this enum just picks which one a
/// given call goes through, the way the original branches on `IsCluster` at
/// construction time and never again.
#[derive(Clone)]
pub enum RedisConn {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl RedisConn {
    pub async fn xgroup_create_mkstream(
        &mut self,
        stream: &str,
        group: &str,
        id: &str,
    ) -> Result<(), RedisError> {
        match self {
            RedisConn::Single(c) => c.xgroup_create_mkstream(stream, group, id).await,
            RedisConn::Cluster(c) => c.xgroup_create_mkstream(stream, group, id).await,
        }
    }

    /// `NOMKSTREAM`: `Add` must never implicitly create the stream (§4.B
    /// invariant 1), so a missing stream answers with a nil reply here
    /// rather than silently provisioning one.
    pub async fn xadd(
        &mut self,
        stream: &str,
        id: &str,
        fields: &[(String, String)],
    ) -> Result<Option<String>, RedisError> {
        let opts = StreamAddOptions::default().nomkstream();
        match self {
            RedisConn::Single(c) => c.xadd_options(stream, id, fields, &opts).await,
            RedisConn::Cluster(c) => c.xadd_options(stream, id, fields, &opts).await,
        }
    }

    pub async fn xread_options(
        &mut self,
        keys: &[&str],
        ids: &[&str],
        opts: &StreamReadOptions,
    ) -> Result<Option<StreamReadReply>, RedisError> {
        match self {
            RedisConn::Single(c) => c.xread_options(keys, ids, opts).await,
            RedisConn::Cluster(c) => c.xread_options(keys, ids, opts).await,
        }
    }

    pub async fn xack(&mut self, stream: &str, group: &str, ids: &[String]) -> Result<usize, RedisError> {
        match self {
            RedisConn::Single(c) => c.xack(stream, group, ids).await,
            RedisConn::Cluster(c) => c.xack(stream, group, ids).await,
        }
    }

    pub async fn xdel(&mut self, stream: &str, ids: &[String]) -> Result<usize, RedisError> {
        match self {
            RedisConn::Single(c) => c.xdel(stream, ids).await,
            RedisConn::Cluster(c) => c.xdel(stream, ids).await,
        }
    }
}
