mod config;
mod context;
mod errors;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::Consumer;
use rdkafka::message::Message as _;
use rdkafka::ClientConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use schema_validator::SchemaValidator;
use stream_buffer::StreamBuffer;

use config::{Config, StreamBackend};
use context::{LoggingConsumer, PipelineContext, PipelineContextArgs, WorkerRegistry};
use errors::Result;
use worker::OwnedRecord;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    let shutdown = CancellationToken::new();

    tokio::spawn(wait_for_shutdown_signals(shutdown.clone()));

    run(config, shutdown).await
}

async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let validator = Arc::new(match &config.schema.default_base_uri {
        Some(base) => SchemaValidator::with_base_uri(base)
            .map_err(|e| errors::ConsumerError::Config(format!("invalid schemaValidator.defaultBaseURI: {e}")))?,
        None => SchemaValidator::new(),
    });

    let (backend, connection) = config.repository.resolve()?;
    let buffer: Arc<dyn StreamBuffer> = match backend {
        StreamBackend::Redis => Arc::new(
            stream_buffer::connect_redis(
                &connection,
                &config.repository.stream.name,
                &config.repository.stream.group,
                &config.repository.stream.consumer,
                config.repository.stream.read_count,
                config.repository.stream.block_ms,
            )
            .await?,
        ),
        StreamBackend::Valkey => Arc::new(
            stream_buffer::connect_valkey(
                &connection,
                &config.repository.stream.name,
                &config.repository.stream.group,
                &config.repository.stream.consumer,
                config.repository.stream.read_count,
                config.repository.stream.block_ms,
            )
            .await?,
        ),
    };

    let on_rejected: worker::OnRejected = Arc::new(|record, reason| {
        tracing::warn!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            reason,
            "record rejected"
        );
    });

    let registry: Arc<WorkerRegistry> = Arc::new(std::sync::Mutex::new(HashMap::new()));

    let context = PipelineContext::new(PipelineContextArgs {
        registry: registry.clone(),
        runtime: tokio::runtime::Handle::current(),
        validator,
        buffer,
        on_rejected,
        channel_size: config.kafka.partition_records_channel_size.max(5),
        max_process_routines: config.max_process_routines,
        close_timeout: Duration::from_millis(config.close_timeout_ms),
    });

    let consumer: Arc<LoggingConsumer> = Arc::new(
        ClientConfig::new()
            .set("group.id", &config.kafka.group_id)
            .set("bootstrap.servers", &config.kafka.brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "10000")
            .set("max.poll.interval.ms", "300000")
            .set_log_level(RDKafkaLogLevel::Info)
            .create_with_context(context)?,
    );
    consumer.context().set_consumer_handle(Arc::downgrade(&consumer));

    let topics: Vec<&str> = config.kafka.topics.iter().map(String::as_str).collect();
    consumer.subscribe(&topics)?;

    tracing::info!(
        brokers = %config.kafka.brokers,
        topics = ?config.kafka.topics,
        group = %config.kafka.group_id,
        "pipeline consumer started"
    );

    poll_loop(consumer, shutdown, config.kafka.max_poll_records).await
}

/// How long to wait for another record before treating the current batch as
/// a completed poll and flushing it. `consumer.recv()` yields one message at
/// a time, so without an idle cutoff the batch would never accumulate past
/// one record and `maxPollRecords` would be meaningless.
const POLL_IDLE_FLUSH: Duration = Duration::from_millis(100);

/// `PollRecords` → per-partition dispatch → `AllowRebalance()`, where
/// "allow rebalance" is implicit: rdkafka only re-enters its rebalance
/// callbacks between calls to `recv`, so simply returning to the top of this
/// loop after every batch has been handed off is the emulation the design
/// notes call for — no librdkafka client exposes an explicit latch the way
/// franz-go's `AllowRebalance` does.
async fn poll_loop(
    consumer: Arc<LoggingConsumer>,
    shutdown: CancellationToken,
    max_poll_records: usize,
) -> Result<()> {
    let mut batch: HashMap<(String, i32), Vec<OwnedRecord>> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested, exiting poll loop");
                if !batch.is_empty() {
                    dispatch_batch(&consumer, &mut batch).await;
                }
                break;
            }
            result = tokio::time::timeout(POLL_IDLE_FLUSH, consumer.recv()) => {
                match result {
                    Ok(Ok(msg)) => {
                        let key = (msg.topic().to_string(), msg.partition());
                        batch.entry(key).or_default().push(OwnedRecord::from_borrowed(&msg));

                        let total: usize = batch.values().map(Vec::len).sum();
                        if total >= max_poll_records {
                            dispatch_batch(&consumer, &mut batch).await;
                        }
                    }
                    Ok(Err(e)) => {
                        // Per-partition fetch errors are not fatal: log and
                        // keep polling, matching the "log and continue" rule.
                        tracing::error!(error = %e, "kafka fetch error");
                    }
                    Err(_elapsed) => {
                        // End of this poll: nothing arrived within the idle
                        // window, so whatever accumulated is a complete batch.
                        if !batch.is_empty() {
                            dispatch_batch(&consumer, &mut batch).await;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

async fn dispatch_batch(
    consumer: &Arc<LoggingConsumer>,
    batch: &mut HashMap<(String, i32), Vec<OwnedRecord>>,
) {
    let registry = consumer.context().registry.clone();
    for ((topic, partition), records) in batch.drain() {
        let sender = {
            let guard = registry.lock().expect("registry mutex poisoned");
            guard.get(&(topic.clone(), partition)).map(|h| h.inbox.clone())
        };
        match sender {
            Some(sender) => {
                // A full inbox blocks this send, which blocks the poll loop —
                // the intended back-pressure path when B or C is slow.
                if sender.send(records).await.is_err() {
                    tracing::warn!(topic, partition, "partition worker inbox closed, dropping batch");
                }
            }
            None => {
                tracing::error!(
                    topic,
                    partition,
                    "no worker registered for partition; dropping batch (should be unreachable)"
                );
            }
        }
    }
}

async fn wait_for_shutdown_signals(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = term.recv() => tracing::info!("received SIGTERM"),
        _ = int.recv() => tracing::info!("received SIGINT"),
    }
    shutdown.cancel();

    // Two-stage interrupt: a second signal aborts graceful shutdown immediately.
    tokio::select! {
        _ = term.recv() => {},
        _ = int.recv() => {},
    }
    tracing::warn!("second interrupt received, aborting immediately");
    std::process::exit(130);
}
