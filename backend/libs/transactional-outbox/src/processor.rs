use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::metrics::OutboxMetrics;
use crate::{OutboxEvent, OutboxRepository, OutboxResult};

/// Longest pause between two attempts on the same row
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Pause after the `retry_count`-th failure: 2^retry_count seconds, capped.
pub fn retry_delay(retry_count: i32) -> Duration {
    let exponent = retry_count.clamp(0, 16) as u32;
    Duration::from_secs(1u64 << exponent).min(MAX_RETRY_DELAY)
}

/// Whether a row's last failure is at least [`retry_delay`] in the past
pub fn is_due(event: &OutboxEvent, now: DateTime<Utc>) -> bool {
    let Some(last_attempt) = event.last_attempt_at else {
        return true;
    };
    let wait = chrono::Duration::from_std(retry_delay(event.retry_count))
        .unwrap_or_else(|_| chrono::Duration::seconds(MAX_RETRY_DELAY.as_secs() as i64));
    last_attempt + wait <= now
}

/// Hands an outbox row to the bus. Must tolerate the same row twice.
#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()>;
}

/// Polls the outbox and publishes due rows.
pub struct OutboxProcessor<R: OutboxRepository, P: OutboxPublisher> {
    repository: Arc<R>,
    publisher: Arc<P>,
    batch_size: i32,
    poll_interval: Duration,
    max_retries: i32,
    metrics: Option<OutboxMetrics>,
}

impl<R: OutboxRepository, P: OutboxPublisher> OutboxProcessor<R, P> {
    pub fn new(
        repository: Arc<R>,
        publisher: Arc<P>,
        batch_size: i32,
        poll_interval: Duration,
        max_retries: i32,
    ) -> Self {
        Self {
            repository,
            publisher,
            batch_size,
            poll_interval,
            max_retries,
            metrics: None,
        }
    }

    /// Report backlog and publish counts through `metrics`
    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Poll until the task is dropped. Errors are logged, never returned.
    pub async fn start(&self) -> anyhow::Result<()> {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_retries = self.max_retries,
            "Outbox processor starting"
        );

        loop {
            match self.process_batch().await {
                Ok(0) => debug!("Outbox idle"),
                Ok(count) => info!(published_count = count, "Drained outbox batch"),
                Err(e) => error!(error = %e, "Outbox drain failed"),
            }
            self.refresh_gauges().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One drain pass; returns how many rows were published and marked.
    pub async fn process_batch(&self) -> OutboxResult<i32> {
        let due = self
            .repository
            .fetch_due(self.batch_size, self.max_retries)
            .await?;
        let mut published = 0;

        for event in due {
            match self.publisher.publish(&event).await {
                Ok(()) => match self.repository.mark_published(event.id).await {
                    Ok(()) => {
                        published += 1;
                        if let Some(m) = &self.metrics {
                            m.published.inc();
                        }
                    }
                    // Already on the bus; the next pass sends it again and
                    // the consumer drops the duplicate
                    Err(e) => error!(
                        event_id = %event.id,
                        error = %e,
                        "Event delivered but not marked published"
                    ),
                },
                Err(e) => self.record_failure(&event, &e.to_string()).await,
            }
        }

        Ok(published)
    }

    async fn record_failure(&self, event: &OutboxEvent, reason: &str) {
        if let Some(m) = &self.metrics {
            m.publish_failures.inc();
        }

        let attempts = event.retry_count + 1;
        if attempts >= self.max_retries {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                attempts,
                error = %reason,
                "Event exhausted its publish retries; replay it with outbox-cli"
            );
        } else {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                attempts,
                retry_in_secs = retry_delay(attempts).as_secs(),
                error = %reason,
                "Publish failed, will retry"
            );
        }

        if let Err(e) = self.repository.mark_failed(event.id, reason).await {
            error!(event_id = %event.id, error = %e, "Could not record publish failure");
        }
    }

    async fn refresh_gauges(&self) {
        let Some(m) = &self.metrics else {
            return;
        };
        match self.repository.pending_stats(self.max_retries).await {
            Ok(stats) => m.observe(&stats),
            Err(e) => debug!(error = %e, "Skipping outbox gauge refresh"),
        }
    }
}
