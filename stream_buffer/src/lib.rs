//! Durable stream buffer (component B of the pipeline): a thin,
//! backend-polymorphic wrapper over Redis/Valkey streams giving the
//! partitioned consumer a durable hand-off point before Kafka offsets are
//! committed, and the drain loop a source of batches to persist.

mod buffer;
mod connection;
mod error;
mod message;
mod redis_backend;

pub use buffer::StreamBuffer;
pub use connection::RedisConnectionConfig;
pub use error::{Result, StreamError};
pub use message::{Message, FIELD_DATA, FIELD_ORIGIN, FIELD_SCHEMA_URI, FIELD_TIMESTAMP};
pub use redis_backend::{connect_redis, connect_valkey, Dialect, RedisStreamBuffer};
