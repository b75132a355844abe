mod config;
mod errors;
mod reaper;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sink_writer::{DynamoConfig, SinkWriter};
use stream_buffer::StreamBuffer;

use config::{Config, StreamBackend};
use errors::{DrainError, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    let (backend, connection) = config.stream.resolve()?;
    let buffer: Arc<dyn StreamBuffer> = match backend {
        StreamBackend::Redis => Arc::new(
            stream_buffer::connect_redis(
                &connection,
                &config.stream.name,
                &config.stream.group,
                &config.stream.consumer,
                config.stream.read_count,
                config.stream.block_ms,
            )
            .await?,
        ),
        StreamBackend::Valkey => Arc::new(
            stream_buffer::connect_valkey(
                &connection,
                &config.stream.name,
                &config.stream.group,
                &config.stream.consumer,
                config.stream.read_count,
                config.stream.block_ms,
            )
            .await?,
        ),
    };

    let dynamo_config = DynamoConfig {
        endpoint: config.sink.endpoint.clone(),
        table_name: config.sink.table_name.clone(),
        retry_max: config.sink.retry_max,
        retry_wait_max: Duration::from_millis(config.sink.retry_wait_max_ms),
    };
    let sink = Arc::new(SinkWriter::new(&dynamo_config).await);

    tokio::spawn(reaper::run(buffer.clone(), config.reaper.clone(), shutdown.clone()));

    tracing::info!(
        stream = %config.stream.name,
        table = %config.sink.table_name,
        interval_ms = config.stream.interval_ms,
        "drain loop started"
    );

    run_ticker(buffer, sink, Duration::from_millis(config.stream.interval_ms), shutdown).await
}

/// At most one cycle runs at a time (self-serialized): the tick fires on a
/// fixed interval, but a `Mutex`-guarded in-flight flag skips a tick that
/// would overlap a still-running cycle rather than queueing it up. On
/// shutdown, the loop waits for the last acquired lock to be released
/// before returning, so an in-flight cycle always finishes.
async fn run_ticker(
    buffer: Arc<dyn StreamBuffer>,
    sink: Arc<SinkWriter>,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let busy = Arc::new(Mutex::new(()));
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested, waiting for in-flight cycle to finish");
                let _guard = busy.lock().await;
                break;
            }
            _ = ticker.tick() => {
                let Ok(_guard) = busy.clone().try_lock_owned() else {
                    tracing::debug!("previous drain cycle still running, skipping this tick");
                    continue;
                };
                if let Err(e) = drain_cycle(&buffer, &sink).await {
                    tracing::error!(error = %e, "drain cycle failed");
                }
            }
        }
    }

    Ok(())
}

async fn drain_cycle(buffer: &Arc<dyn StreamBuffer>, sink: &Arc<SinkWriter>) -> Result<()> {
    let messages = buffer.read_group().await?;
    if messages.is_empty() {
        tracing::debug!("drain cycle: nothing to read");
        return Ok(());
    }

    let attempted = messages.len();
    let (unpersisted, sink_err) = sink.batch_write(&messages).await;

    if let Some(e) = &sink_err {
        tracing::error!(error = %e, "sink batch write reported an error");
    }

    let unpersisted_set: std::collections::HashSet<&String> = unpersisted.iter().collect();
    let persisted: Vec<String> = messages
        .keys()
        .filter(|id| !unpersisted_set.contains(id))
        .cloned()
        .collect();

    if persisted.is_empty() {
        tracing::error!(attempted, unpersisted = ?unpersisted, "drain cycle persisted nothing");
        return Err(DrainError::NothingPersisted {
            attempted,
            unpersisted,
        });
    }

    if let Err(e) = buffer.ack(&persisted).await {
        // Unacked entries remain pending and are redelivered via
        // `ReadGroup("0")` on the next cycle — ack failure does not lose data.
        tracing::error!(error = %e, acked_ids = ?persisted, "ack failed; entries will be redelivered");
    }

    tracing::info!(
        attempted,
        persisted = persisted.len(),
        unpersisted = unpersisted.len(),
        "drain cycle complete"
    );

    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = term.recv() => tracing::info!("received SIGTERM"),
        _ = int.recv() => tracing::info!("received SIGINT"),
    }
    shutdown.cancel();
}
