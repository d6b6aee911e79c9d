use idempotent_consumer::IdempotencyGuard;
use std::time::Duration;
use tracing::{debug, warn};

/// Periodically delete processed-event markers past their retention window.
pub async fn run(guard: IdempotencyGuard, interval: Duration) -> anyhow::Result<()> {
    anyhow::ensure!(!interval.is_zero(), "cleanup interval must be greater than zero");

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match guard.cleanup_old_events().await {
            Ok(deleted) => debug!(deleted, "Processed-event cleanup finished"),
            // Retried on the next tick
            Err(e) => warn!(error = %e, "Processed-event cleanup failed"),
        }
    }
}
