use crate::bus::EventBus;
use crate::config::OutboxConfig;
use crate::propagation::BusPublisher;
use anyhow::Context;
use resilience::presets;
use std::sync::Arc;
use tracing::info;
use transactional_outbox::{metrics::OutboxMetrics, OutboxProcessor, SqlxOutboxRepository};

/// Drain the outbox into the event bus until the task is cancelled.
pub async fn run(
    repo: Arc<SqlxOutboxRepository>,
    bus: Arc<dyn EventBus>,
    config: OutboxConfig,
    topic_prefix: String,
    service_name: String,
) -> anyhow::Result<()> {
    info!(topic_prefix = %topic_prefix, "Starting outbox worker");

    // Quick retries inside one publish; the processor's backoff spans polls
    let publisher = Arc::new(BusPublisher::new(
        bus,
        topic_prefix,
        service_name.clone(),
        presets::bus_publish(),
    ));
    let metrics = OutboxMetrics::register(
        prometheus::default_registry(),
        &service_name.replace('-', "_"),
    )
    .context("Failed to build outbox metrics")?;

    OutboxProcessor::new(
        repo,
        publisher,
        config.batch_size,
        config.poll_interval,
        config.max_retries,
    )
    .with_metrics(metrics)
    .start()
    .await
}
