use super::from_outbox_event;
use crate::bus::{topic_for, EventBus};
use crate::metrics::BUS_PUBLISH_TOTAL;
use async_trait::async_trait;
use event_schema::LifecycleEvent;
use resilience::{with_retry, RetryConfig};
use std::sync::Arc;
use tracing::{debug, error};
use transactional_outbox::{OutboxError, OutboxEvent, OutboxPublisher, OutboxResult};

/// Outbox publisher that sends rows to the event bus with bounded retries.
///
/// Exhausted retries surface as `PublishFailed`; the outbox processor then
/// records the failure on the row and tries again on a later cycle.
pub struct BusPublisher {
    bus: Arc<dyn EventBus>,
    topic_prefix: String,
    source: String,
    retry: RetryConfig,
}

impl BusPublisher {
    pub fn new(
        bus: Arc<dyn EventBus>,
        topic_prefix: impl Into<String>,
        source: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            bus,
            topic_prefix: topic_prefix.into(),
            source: source.into(),
            retry,
        }
    }
}

#[async_trait]
impl OutboxPublisher for BusPublisher {
    async fn publish(&self, row: &OutboxEvent) -> OutboxResult<()> {
        let event = from_outbox_event(row, &self.source);
        let topic = topic_for(&self.topic_prefix, &event.event_type);

        match with_retry(self.retry.clone(), || self.bus.publish(&topic, &event)).await {
            Ok(()) => {
                BUS_PUBLISH_TOTAL.with_label_values(&["ok"]).inc();
                debug!(event_id = %row.id, topic = %topic, "Outbox event published");
                Ok(())
            }
            Err(e) => {
                BUS_PUBLISH_TOTAL.with_label_values(&["error"]).inc();
                let last = e.into_last();
                error!(
                    event_id = %row.id,
                    event_type = %row.event_type,
                    topic = %topic,
                    error = %last,
                    "PublishFailed: bus did not acknowledge outbox event"
                );
                Err(OutboxError::PublishFailed(last.to_string()))
            }
        }
    }
}

/// Publish without an outbox: retry, then log and give up.
///
/// For callers whose local change is already committed and who must not
/// fail because the bus is down.
pub async fn publish_best_effort(
    bus: &dyn EventBus,
    topic_prefix: &str,
    event: &LifecycleEvent,
    retry: RetryConfig,
) {
    let topic = topic_for(topic_prefix, &event.event_type);

    match with_retry(retry, || bus.publish(&topic, event)).await {
        Ok(()) => {
            BUS_PUBLISH_TOTAL.with_label_values(&["ok"]).inc();
        }
        Err(e) => {
            BUS_PUBLISH_TOTAL.with_label_values(&["error"]).inc();
            error!(
                event_key = %event.dedup_key(),
                event_type = %event.event_type,
                topic = %topic,
                error = %e.into_last(),
                "PublishFailed: giving up on best-effort publish"
            );
        }
    }
}
