use std::sync::Arc;

use rdkafka::consumer::{CommitMode, Consumer};
use rdkafka::message::{BorrowedMessage, Headers, Message as _};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use schema_validator::{SchemaValidator, ValidateError};
use stream_buffer::{Message as BufferedMessage, StreamBuffer};

use crate::context::LoggingConsumer;

/// A record handed from the poll loop to its partition worker. Owns its
/// bytes rather than borrowing from the original `BorrowedMessage` so it can
/// cross the channel into the worker task.
pub struct OwnedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub schema_uri: Option<String>,
    pub origin: String,
    pub payload: Vec<u8>,
}

impl OwnedRecord {
    pub fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let schema_uri = msg.headers().and_then(|headers| {
            headers.iter().find_map(|h| {
                if h.key == "schemaURI" {
                    h.value
                        .map(|v| String::from_utf8_lossy(v).into_owned())
                } else {
                    None
                }
            })
        });

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            schema_uri,
            origin: format!("kafka://{}/{}", msg.topic(), msg.partition()),
            payload: msg.payload().unwrap_or_default().to_vec(),
        }
    }
}

/// A callback invoked whenever a record is dropped instead of buffered —
/// invalid payload or validator error. Defaults to a no-op (just logs); a
/// caller wanting a dead-letter topic wires one in without touching the
/// worker loop itself.
pub type OnRejected = Arc<dyn Fn(&OwnedRecord, &str) + Send + Sync>;

pub struct PartitionWorkerHandle {
    pub inbox: mpsc::Sender<Vec<OwnedRecord>>,
    pub quit: CancellationToken,
    pub done: oneshot::Receiver<()>,
}

pub struct PartitionWorker {
    topic: String,
    partition: i32,
    consumer: Arc<LoggingConsumer>,
    validator: Arc<SchemaValidator>,
    buffer: Arc<dyn StreamBuffer>,
    on_rejected: OnRejected,
    inbox: mpsc::Receiver<Vec<OwnedRecord>>,
    quit: CancellationToken,
    done: oneshot::Sender<()>,
    process_limiter: Arc<tokio::sync::Semaphore>,
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_worker(
    topic: String,
    partition: i32,
    channel_size: usize,
    consumer: Arc<LoggingConsumer>,
    validator: Arc<SchemaValidator>,
    buffer: Arc<dyn StreamBuffer>,
    on_rejected: OnRejected,
    max_process_routines: usize,
    runtime: &tokio::runtime::Handle,
) -> PartitionWorkerHandle {
    let (tx, rx) = mpsc::channel(channel_size);
    let (done_tx, done_rx) = oneshot::channel();
    let quit = CancellationToken::new();

    let worker = PartitionWorker {
        topic,
        partition,
        consumer,
        validator,
        buffer,
        on_rejected,
        inbox: rx,
        quit: quit.clone(),
        done: done_tx,
        process_limiter: Arc::new(tokio::sync::Semaphore::new(max_process_routines.max(1))),
    };

    runtime.spawn(worker.run());

    PartitionWorkerHandle {
        inbox: tx,
        quit,
        done: done_rx,
    }
}

impl PartitionWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.quit.cancelled() => break,
                received = self.inbox.recv() => {
                    match received {
                        Some(records) => self.handle_batch(records).await,
                        None => break,
                    }
                }
            }
        }
        let _ = self.done.send(());
    }

    async fn handle_batch(&self, records: Vec<OwnedRecord>) {
        if records.is_empty() {
            return;
        }

        let mut valid = Vec::with_capacity(records.len());
        for record in &records {
            match self.validate_one(record) {
                Ok(msg) => valid.push(msg),
                Err(reason) => {
                    tracing::warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        reason = %reason,
                        "dropping record that failed validation"
                    );
                    (self.on_rejected)(record, &reason);
                }
            }
        }

        // Bounded fan-out: `maxProcessRoutines` caps how many `Add` calls run
        // concurrently for this batch, rather than firing all of them at once.
        let futures = valid.iter().map(|msg| async move {
            let _permit = self
                .process_limiter
                .acquire()
                .await
                .expect("semaphore is never closed");
            self.buffer.add(msg).await
        });
        let results = futures::future::join_all(futures).await;
        let all_succeeded = results.iter().all(|r| r.is_ok());
        for (result, msg) in results.iter().zip(valid.iter()) {
            if let Err(e) = result {
                tracing::error!(schema_uri = %msg.schema_uri, error = %e, "failed to buffer message");
            }
        }

        if !all_succeeded {
            tracing::error!(
                topic = %self.topic,
                partition = self.partition,
                "batch buffering failed in full or in part; not committing offsets for this batch"
            );
            return;
        }

        if let Some(last) = records.iter().max_by_key(|r| r.offset) {
            self.commit(last.offset);
        }
    }

    fn validate_one(&self, record: &OwnedRecord) -> Result<BufferedMessage, String> {
        validate_record(&self.validator, record)
    }

    fn commit(&self, offset: i64) {
        let mut tpl = TopicPartitionList::new();
        if let Err(e) = tpl.add_partition_offset(&self.topic, self.partition, Offset::Offset(offset + 1)) {
            tracing::error!(error = %e, "failed to build offset commit list");
            return;
        }
        if let Err(e) = self.consumer.commit(&tpl, CommitMode::Async) {
            tracing::error!(
                topic = %self.topic,
                partition = self.partition,
                offset,
                error = %e,
                "commit failed; next successful batch will advance past it"
            );
        }
    }
}

fn validate_record(validator: &SchemaValidator, record: &OwnedRecord) -> Result<BufferedMessage, String> {
    let schema_uri = record
        .schema_uri
        .clone()
        .ok_or_else(|| "record carries no schemaURI header".to_string())?;

    let payload: serde_json::Value =
        serde_json::from_slice(&record.payload).map_err(|e| e.to_string())?;

    match validator.validate(&schema_uri, &payload) {
        Ok(result) if result.valid => Ok(BufferedMessage::new(
            record.origin.clone(),
            schema_uri,
            payload,
        )),
        Ok(result) => Err(format!("payload invalid: {}", result.errors.join("; "))),
        Err(ValidateError::SchemaUnavailable(uri, source)) => {
            Err(format!("schema {uri} unavailable: {source}"))
        }
        Err(ValidateError::InternalCompilerError(uri, msg)) => {
            Err(format!("internal compiler error for {uri}: {msg}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(schema_uri: Option<&str>, payload: &serde_json::Value) -> OwnedRecord {
        OwnedRecord {
            topic: "orders".to_string(),
            partition: 0,
            offset: 42,
            schema_uri: schema_uri.map(str::to_string),
            origin: "kafka://orders/0".to_string(),
            payload: payload.to_string().into_bytes(),
        }
    }

    #[tokio::test]
    async fn validate_record_accepts_conforming_payload() {
        let validator = SchemaValidator::new();
        let schema = serde_json::json!({"type": "object", "required": ["id"]});
        validator
            .add_schema("mem://order.v1", schema.to_string().as_bytes())
            .await
            .unwrap();

        let record = record_with(Some("mem://order.v1"), &serde_json::json!({"id": "a"}));
        let msg = validate_record(&validator, &record).unwrap();
        assert_eq!(msg.schema_uri, "mem://order.v1");
    }

    #[tokio::test]
    async fn validate_record_drops_payload_missing_required_field() {
        let validator = SchemaValidator::new();
        let schema = serde_json::json!({"type": "object", "required": ["id"]});
        validator
            .add_schema("mem://order.v1", schema.to_string().as_bytes())
            .await
            .unwrap();

        let record = record_with(Some("mem://order.v1"), &serde_json::json!({}));
        assert!(validate_record(&validator, &record).is_err());
    }

    #[tokio::test]
    async fn validate_record_without_schema_header_is_rejected() {
        let validator = SchemaValidator::new();
        let record = record_with(None, &serde_json::json!({}));
        assert!(validate_record(&validator, &record).is_err());
    }

    #[tokio::test]
    async fn validate_record_against_unregistered_schema_is_rejected() {
        let validator = SchemaValidator::new();
        let record = record_with(Some("mem://missing"), &serde_json::json!({}));
        let err = validate_record(&validator, &record).unwrap_err();
        assert!(err.contains("unavailable"));
    }
}
