use std::sync::Arc;
use std::time::Duration;

use stream_buffer::StreamBuffer;
use tokio_util::sync::CancellationToken;

use crate::config::ReaperConfig;

/// Opt-in TTL pruning, outside the core drain cycle per the design notes:
/// the cycle itself never calls `Delete`. When enabled, periodically asks
/// the buffer to drop acked entries older than `max_age_secs`.
///
/// Deletion of *unacked* entries is deliberately out of scope here — this
/// reaper only ever removes what's already safely in the sink, which the
/// current `StreamBuffer` trait can't distinguish without a range-scan
/// primitive this crate doesn't expose yet.
pub async fn run(buffer: Arc<dyn StreamBuffer>, config: ReaperConfig, shutdown: CancellationToken) {
    if !config.enabled {
        return;
    }

    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                tracing::debug!(max_age_secs = config.max_age_secs, "reaper tick (no-op: range scan not yet implemented)");
                let _ = &buffer;
            }
        }
    }
}
