use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// The four operations every backend exposes over a named stream `S` and
/// group `G`, scoped to a consumer name `C` fixed at construction time.
/// Redis and Valkey differ only in client bootstrap, never in this surface —
/// callers program against the trait, never the concrete backend.
#[async_trait]
pub trait StreamBuffer: Send + Sync {
    /// Append one entry. Does not create the stream: the stream and its
    /// consumer group are provisioned once, lazily, at construction.
    async fn add(&self, msg: &Message) -> Result<String>;

    /// Claim up to `read_count` entries for `(G, C)`. Always includes this
    /// consumer's still-pending (delivered, un-acked) entries alongside any
    /// new ones, so a restart never silently drops in-flight work. Blocks up
    /// to the configured block duration if nothing is ready.
    async fn read_group(&self) -> Result<HashMap<String, Message>>;

    /// Mark the given entry ids as processed by `G`.
    async fn ack(&self, ids: &[String]) -> Result<()>;

    /// Physically remove the given entry ids from the stream.
    async fn delete(&self, ids: &[String]) -> Result<()>;
}
