use std::collections::HashMap;

use async_trait::async_trait;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::RedisError;

use crate::buffer::StreamBuffer;
use crate::connection::{RedisConn, RedisConnectionConfig};
use crate::error::{Result, StreamError};
use crate::message::Message;

/// Backend dialect, kept only so logs and error context can say which wire
/// protocol a given client was opened against. Operationally the two are
/// identical: Valkey speaks the Redis stream protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Redis,
    Valkey,
}

/// A `StreamBuffer` over a Redis-protocol stream. Constructed via
/// [`connect_redis`] or [`connect_valkey`] — the two differ only in which
/// dialect they log, since both speak the same wire protocol.
pub struct RedisStreamBuffer {
    dialect: Dialect,
    conn: RedisConn,
    stream: String,
    group: String,
    consumer: String,
    read_count: usize,
    block_ms: usize,
}

impl RedisStreamBuffer {
    async fn connect(
        dialect: Dialect,
        connection: &RedisConnectionConfig,
        stream: &str,
        group: &str,
        consumer: &str,
        read_count: usize,
        block_ms: usize,
    ) -> Result<Self> {
        if read_count <= 10 {
            return Err(StreamError::Config(
                "read_count must be greater than 10".to_string(),
            ));
        }
        if block_ms < 10 {
            return Err(StreamError::Config(
                "block_ms must be at least 10ms".to_string(),
            ));
        }

        let mut conn = connection.connect().await?;

        // Lazily provision the stream and its consumer group. "BUSYGROUP"
        // means another process already did this — that's success, not an
        // error; any other failure is real and propagates.
        // Start the group at "0" (the beginning of the stream), not "$": a
        // group created over a stream that already holds un-consumed
        // entries must still see them, matching the original and the
        // at-least-once intent of §8.1.
        let created: std::result::Result<(), RedisError> = conn
            .xgroup_create_mkstream(stream, group, "0")
            .await;
        if let Err(e) = created {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(e.into());
            }
        }

        Ok(Self {
            dialect,
            conn,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            read_count,
            block_ms,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn parse_reply(reply: StreamReadReply) -> Result<HashMap<String, Message>> {
        let mut out = HashMap::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let fields: HashMap<String, String> = entry
                    .map
                    .into_iter()
                    .filter_map(|(k, v)| match v {
                        redis::Value::Data(bytes) => {
                            String::from_utf8(bytes).ok().map(|s| (k, s))
                        }
                        redis::Value::Status(s) => Some((k, s)),
                        _ => None,
                    })
                    .collect();
                let msg = Message::from_fields(&fields)?;
                out.insert(entry.id, msg);
            }
        }
        Ok(out)
    }
}

/// Connect to a Redis-dialect stream, provisioning the stream and consumer
/// group if they don't already exist.
pub async fn connect_redis(
    connection: &RedisConnectionConfig,
    stream: &str,
    group: &str,
    consumer: &str,
    read_count: usize,
    block_ms: usize,
) -> Result<RedisStreamBuffer> {
    RedisStreamBuffer::connect(
        Dialect::Redis,
        connection,
        stream,
        group,
        consumer,
        read_count,
        block_ms,
    )
    .await
}

/// Connect to a Valkey-dialect stream. Valkey is wire-compatible with Redis
/// streams, so this shares `RedisStreamBuffer`'s implementation entirely;
/// only the dialect tag differs.
pub async fn connect_valkey(
    connection: &RedisConnectionConfig,
    stream: &str,
    group: &str,
    consumer: &str,
    read_count: usize,
    block_ms: usize,
) -> Result<RedisStreamBuffer> {
    RedisStreamBuffer::connect(
        Dialect::Valkey,
        connection,
        stream,
        group,
        consumer,
        read_count,
        block_ms,
    )
    .await
}

#[async_trait]
impl StreamBuffer for RedisStreamBuffer {
    async fn add(&self, msg: &Message) -> Result<String> {
        let mut conn = self.conn.clone();
        let fields = msg.to_fields();
        let id: Option<String> = conn.xadd(&self.stream, "*", &fields).await?;
        id.ok_or(StreamError::NilResult)
    }

    async fn read_group(&self) -> Result<HashMap<String, Message>> {
        // Pending-first: read this consumer's own PEL (`"0"`) and anything
        // nobody has claimed yet (`">"`) in a single XREADGROUP call by
        // repeating the stream key against both ids, so a restart never
        // loses sight of in-flight work and ordering matches a single
        // backend round-trip rather than two racing ones.
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.read_count)
            .block(self.block_ms);

        let reply: Option<StreamReadReply> = conn
            .xread_options(
                &[self.stream.as_str(), self.stream.as_str()],
                &[">", "0"],
                &opts,
            )
            .await?;

        match reply {
            Some(r) => Self::parse_reply(r),
            None => Ok(HashMap::new()),
        }
    }

    async fn ack(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: usize = conn.xack(&self.stream, &self.group, ids).await?;
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: usize = conn.xdel(&self.stream, ids).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn test_connection() -> Option<RedisConnectionConfig> {
        let address = std::env::var("STREAM_BUFFER_TEST_REDIS_ADDRESS").ok()?;
        Some(RedisConnectionConfig {
            address,
            username: None,
            password: None,
            client_name: None,
            is_cluster: false,
        })
    }

    /// Requires a running Redis instance; set `STREAM_BUFFER_TEST_REDIS_ADDRESS`
    /// (e.g. `127.0.0.1:6379`) to run. Not exercised in unit runs.
    #[tokio::test]
    #[ignore]
    async fn add_then_read_group_then_ack_round_trips() {
        let connection = test_connection().expect("STREAM_BUFFER_TEST_REDIS_ADDRESS must be set");
        let stream = format!("test-stream-{}", uuid_like());
        let buf = connect_redis(&connection, &stream, "test-group", "test-consumer", 11, 50)
            .await
            .unwrap();

        let msg = Message::new("origin", "schema", serde_json::json!({"a": 1}));
        let id = buf.add(&msg).await.unwrap();

        let read = buf.read_group().await.unwrap();
        assert!(read.contains_key(&id));

        buf.ack(&[id.clone()]).await.unwrap();

        // acked entries stay out of this consumer's pending list on re-read
        let read_again = buf.read_group().await.unwrap();
        assert!(!read_again.contains_key(&id));
    }

    #[tokio::test]
    #[ignore]
    async fn read_group_surfaces_pending_entries_on_restart() {
        let connection = test_connection().expect("STREAM_BUFFER_TEST_REDIS_ADDRESS must be set");
        let stream = format!("test-stream-{}", uuid_like());

        let buf = connect_redis(&connection, &stream, "test-group", "consumer-a", 11, 50)
            .await
            .unwrap();
        let msg = Message::new("origin", "schema", serde_json::json!({}));
        let id = buf.add(&msg).await.unwrap();
        let _ = buf.read_group().await.unwrap();

        // A second client under the same consumer name should see the
        // still-unacked entry as pending, not lose it.
        let restarted = connect_redis(&connection, &stream, "test-group", "consumer-a", 11, 50)
            .await
            .unwrap();
        let pending = restarted.read_group().await.unwrap();
        assert!(pending.contains_key(&id));
    }

    fn uuid_like() -> u128 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    }
}
