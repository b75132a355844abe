//! Batched, idempotent sink writer (component C of the pipeline). Wraps a
//! DynamoDB-style key/value store behind a single `batch_write` contract:
//! hand it everything the drain loop read off the stream buffer, get back
//! the subset that didn't make it so the caller knows what to leave un-acked.

mod config;
mod error;

use std::collections::HashMap;

use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use aws_sdk_dynamodb::Client;

pub use config::DynamoConfig;
pub use error::{Result, SinkError};
use stream_buffer::Message;

/// DynamoDB's own hard cap on items per `BatchWriteItem` call.
const MAX_BATCH_ITEMS: usize = 25;

pub struct SinkWriter {
    client: Client,
    table_name: String,
}

impl SinkWriter {
    pub async fn new(config: &DynamoConfig) -> Self {
        let retry_config = aws_config::retry::RetryConfig::adaptive()
            .with_max_attempts(config.retry_max)
            .with_max_backoff(config.retry_wait_max);

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .retry_config(retry_config);
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        Self {
            client: Client::new(&sdk_config),
            table_name: config.table_name.clone(),
        }
    }

    /// Write every `(id, Message)` pair in a single logical batch (chunked
    /// into DynamoDB's 25-item submission limit). Returns the ids that did
    /// not persist: on a partial provider failure, exactly the unprocessed
    /// subset; on total failure, every id passed in, with the error too.
    /// The returned set is always a subset of the input keys.
    pub async fn batch_write(
        &self,
        messages: &HashMap<String, Message>,
    ) -> (Vec<String>, Option<SinkError>) {
        let chunks: Vec<Vec<String>> = chunk_ids(messages, MAX_BATCH_ITEMS).collect();
        let mut unpersisted = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            match self.write_chunk(chunk, messages).await {
                Ok(mut leftover) => unpersisted.append(&mut leftover),
                Err(e) => {
                    // A chunk-level failure means this chunk's ids, and every
                    // chunk not yet attempted, never made it to the table —
                    // all of them are unpersisted, on top of whatever earlier
                    // chunks already reported as unprocessed.
                    for remaining in &chunks[i..] {
                        unpersisted.extend(remaining.iter().cloned());
                    }
                    return (unpersisted, Some(e));
                }
            }
        }

        (unpersisted, None)
    }

    async fn write_chunk(
        &self,
        ids: &[String],
        messages: &HashMap<String, Message>,
    ) -> Result<Vec<String>> {
        let write_requests: Vec<WriteRequest> = ids
            .iter()
            .filter_map(|id| {
                let msg = messages.get(id)?;
                let put = PutRequest::builder()
                    .item("id", AttributeValue::S(id.clone()))
                    .item("origin", AttributeValue::S(msg.origin.clone()))
                    .item("schemaURI", AttributeValue::S(msg.schema_uri.clone()))
                    .item("data", AttributeValue::S(msg.data.to_string()))
                    .item("timestamp", AttributeValue::S(msg.timestamp.to_rfc3339()))
                    .build()
                    .ok()?;
                Some(WriteRequest::builder().put_request(put).build())
            })
            .collect();

        let response = self
            .client
            .batch_write_item()
            .request_items(self.table_name.clone(), write_requests)
            .send()
            .await
            .map_err(|e| SinkError::BatchWrite(e.to_string()))?;

        // A clean batch write omits `unprocessed_items` entirely (`None`),
        // not an error — total provider failure is already caught above by
        // `.send().await.map_err(..)?`, matching the original's
        // `output == nil` check. Missing/empty here just means everything
        // in this chunk persisted.
        let unprocessed = response
            .unprocessed_items()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_, reqs)| reqs)
            .filter_map(|req| {
                req.put_request()
                    .and_then(|p| p.item().get("id"))
                    .and_then(|v| v.as_s().ok())
                    .cloned()
            })
            .collect();

        Ok(unprocessed)
    }
}

fn chunk_ids(
    messages: &HashMap<String, Message>,
    size: usize,
) -> impl Iterator<Item = Vec<String>> + '_ {
    let ids: Vec<String> = messages.keys().cloned().collect();
    ids.chunks(size).map(|c| c.to_vec()).collect::<Vec<_>>().into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_respects_max_batch_size() {
        let mut messages = HashMap::new();
        for i in 0..60 {
            messages.insert(
                format!("id-{i}"),
                Message::new("origin", "schema", serde_json::json!({})),
            );
        }
        let chunks: Vec<_> = chunk_ids(&messages, MAX_BATCH_ITEMS).collect();
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 60);
        assert!(chunks.iter().all(|c| c.len() <= MAX_BATCH_ITEMS));
    }
}
