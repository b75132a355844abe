use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use rdkafka::client::ClientContext;
use rdkafka::consumer::{ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::TopicPartitionList;

use schema_validator::SchemaValidator;
use stream_buffer::StreamBuffer;

use crate::worker::{spawn_worker, OnRejected, PartitionWorkerHandle};

pub type LoggingConsumer = StreamConsumer<PipelineContext>;

pub type WorkerRegistry = Mutex<HashMap<(String, i32), PartitionWorkerHandle>>;

/// Drives the rebalance-blocking-poll emulation described in the design
/// notes: `pre_rebalance`/`post_rebalance` run on the same thread that calls
/// `poll`/`recv`, so mutating the worker index from inside them serializes
/// correctly against fetches without a side-channel flag.
pub struct PipelineContext {
    pub registry: Arc<WorkerRegistry>,
    pub runtime: tokio::runtime::Handle,
    pub validator: Arc<SchemaValidator>,
    pub buffer: Arc<dyn StreamBuffer>,
    pub on_rejected: OnRejected,
    pub channel_size: usize,
    pub max_process_routines: usize,
    pub close_timeout: Duration,
    /// Set once, right after the owning `Arc<LoggingConsumer>` is built — the
    /// context can't hold a strong reference to it directly, since the
    /// consumer's type is `StreamConsumer<PipelineContext>` and a strong
    /// cycle would leak both. `post_rebalance` upgrades it to spawn workers.
    consumer_handle: OnceLock<Weak<LoggingConsumer>>,
}

#[allow(clippy::too_many_arguments)]
pub struct PipelineContextArgs {
    pub registry: Arc<WorkerRegistry>,
    pub runtime: tokio::runtime::Handle,
    pub validator: Arc<SchemaValidator>,
    pub buffer: Arc<dyn StreamBuffer>,
    pub on_rejected: OnRejected,
    pub channel_size: usize,
    pub max_process_routines: usize,
    pub close_timeout: Duration,
}

impl PipelineContext {
    pub fn new(args: PipelineContextArgs) -> Self {
        Self {
            registry: args.registry,
            runtime: args.runtime,
            validator: args.validator,
            buffer: args.buffer,
            on_rejected: args.on_rejected,
            channel_size: args.channel_size,
            max_process_routines: args.max_process_routines,
            close_timeout: args.close_timeout,
            consumer_handle: OnceLock::new(),
        }
    }
}

impl ClientContext for PipelineContext {}

impl ConsumerContext for PipelineContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                tracing::info!(?tpl, "pre-rebalance: revoking partitions, draining workers");
                self.drain_partitions(tpl);
            }
            Rebalance::Error(e) => {
                tracing::error!(error = %e, "pre-rebalance error; treating as a full revoke is not possible, continuing");
            }
            Rebalance::Assign(_) => {}
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Assign(tpl) = rebalance {
            tracing::info!(?tpl, "post-rebalance: spawning workers for new assignment");
            match self.consumer_handle.get().and_then(Weak::upgrade) {
                Some(consumer) => self.ensure_workers_for(tpl, &consumer),
                None => {
                    tracing::error!(
                        "post-rebalance: no consumer handle set, cannot spawn partition workers"
                    );
                }
            }
        }
    }
}

impl PipelineContext {
    /// Remove each revoked partition's worker from the index, signal it to
    /// quit, and wait (bounded) for its drain to finish — all before the
    /// poller is allowed back into `AllowRebalance`, guaranteeing the next
    /// fetch never races a worker that's still flushing.
    fn drain_partitions(&self, tpl: &TopicPartitionList) {
        for elem in tpl.elements() {
            let key = (elem.topic().to_string(), elem.partition());
            let handle = self.registry.lock().expect("registry mutex poisoned").remove(&key);

            let Some(handle) = handle else { continue };
            handle.quit.cancel();

            let wait = async {
                tokio::time::timeout(self.close_timeout, handle.done).await
            };
            match futures::executor::block_on(wait) {
                Ok(Ok(())) => {
                    tracing::debug!(topic = %key.0, partition = key.1, "partition worker drained");
                }
                Ok(Err(_)) => {
                    tracing::warn!(topic = %key.0, partition = key.1, "partition worker's done sender dropped without signalling");
                }
                Err(_) => {
                    tracing::error!(topic = %key.0, partition = key.1, "partition worker did not drain within the close timeout");
                }
            }
        }
    }

    /// Record the consumer this context belongs to, so `post_rebalance` can
    /// upgrade it to spawn workers. Must be called once, right after the
    /// `Arc<LoggingConsumer>` is constructed and before `subscribe`.
    pub fn set_consumer_handle(&self, consumer: Weak<LoggingConsumer>) {
        let _ = self.consumer_handle.set(consumer);
    }

    /// Spawn a worker for every partition in `tpl` that doesn't already have
    /// one. Called from `post_rebalance`'s `Assign` arm so that every
    /// partition in a new assignment has a worker before its first fetch.
    fn ensure_workers_for(&self, tpl: &TopicPartitionList, consumer: &Arc<LoggingConsumer>) {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        for elem in tpl.elements() {
            let key = (elem.topic().to_string(), elem.partition());
            if registry.contains_key(&key) {
                continue;
            }
            let handle = spawn_worker(
                key.0.clone(),
                key.1,
                self.channel_size,
                consumer.clone(),
                self.validator.clone(),
                self.buffer.clone(),
                self.on_rejected.clone(),
                self.max_process_routines,
                &self.runtime,
            );
            registry.insert(key, handle);
        }
    }
}
