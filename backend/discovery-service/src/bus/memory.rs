use super::{EventBus, EventHandler};
use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use event_schema::LifecycleEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// In-process bus for single-node deployments and tests.
///
/// Subscribers run inside `publish`, and `publish` only succeeds when every
/// subscriber acknowledged the event. A rejection therefore surfaces to the
/// outbox, which keeps the row and publishes it again after its backoff; no
/// unacknowledged event lives only in memory.
#[derive(Default)]
pub struct MemoryEventBus {
    handlers: Mutex<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    log: Mutex<Vec<(String, LifecycleEvent)>>,
    fail_publishes: AtomicU32,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publish calls fail as if the broker were down
    pub fn fail_next_publishes(&self, n: u32) {
        self.fail_publishes.store(n, Ordering::SeqCst);
    }

    /// Every event handed to subscribers of `topic`, in publish order
    pub fn published(&self, topic: &str) -> Vec<LifecycleEvent> {
        self.log
            .lock()
            .map(|log| {
                log.iter()
                    .filter(|(t, _)| t == topic)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliver every logged event on `topic` again, as a broker would after a
    /// rebalance; returns how many deliveries were acknowledged
    pub async fn replay(&self, topic: &str) -> usize {
        let handlers = self.handlers_for(topic);
        let mut acked = 0;
        for event in self.published(topic) {
            for handler in &handlers {
                if deliver(topic, &event, handler.as_ref()).await.is_ok() {
                    acked += 1;
                }
            }
        }
        acked
    }

    fn handlers_for(&self, topic: &str) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .lock()
            .map(|h| h.get(topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

async fn deliver(topic: &str, event: &LifecycleEvent, handler: &dyn EventHandler) -> ServiceResult<()> {
    handler.handle(event).await.map_err(|e| {
        warn!(
            topic = %topic,
            event_key = %event.dedup_key(),
            error = %e,
            "Subscriber rejected event"
        );
        e
    })
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &str, event: &LifecycleEvent) -> ServiceResult<()> {
        let down = self
            .fail_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if down {
            return Err(ServiceError::PublishFailed(format!(
                "memory bus rejected publish to {}",
                topic
            )));
        }

        self.log
            .lock()
            .map_err(|_| ServiceError::Bus("memory bus log poisoned".into()))?
            .push((topic.to_string(), event.clone()));

        // Every subscriber sees the event even if an earlier one rejected it;
        // on the next publish they dedup it
        let mut rejected = 0;
        for handler in self.handlers_for(topic) {
            if deliver(topic, event, handler.as_ref()).await.is_err() {
                rejected += 1;
            }
        }
        if rejected > 0 {
            return Err(ServiceError::Bus(format!(
                "{} subscriber(s) on {} rejected {}",
                rejected,
                topic,
                event.dedup_key()
            )));
        }

        debug!(topic = %topic, event_type = %event.event_type, "Event acknowledged by memory bus");
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[String],
        handler: Arc<dyn EventHandler>,
    ) -> ServiceResult<()> {
        let mut handlers = self
            .handlers
            .lock()
            .map_err(|_| ServiceError::Bus("memory bus handlers poisoned".into()))?;
        for topic in topics {
            handlers
                .entry(topic.clone())
                .or_default()
                .push(handler.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Rejects the first `failures` deliveries
    struct CountingHandler {
        failures: AtomicU32,
        seen: AtomicU32,
    }

    impl CountingHandler {
        fn failing(n: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(n),
                seen: AtomicU32::new(0),
            })
        }

        fn seen(&self) -> u32 {
            self.seen.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &LifecycleEvent) -> ServiceResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            let busy = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if busy {
                return Err(ServiceError::ApplyConflict("busy".into()));
            }
            Ok(())
        }
    }

    fn event() -> LifecycleEvent {
        LifecycleEvent::user_deleted("test", Uuid::new_v4()).unwrap()
    }

    #[tokio::test]
    async fn test_rejection_fails_the_publish() {
        let bus = MemoryEventBus::new();
        let flaky = CountingHandler::failing(1);
        let steady = CountingHandler::failing(0);
        let topics = ["t".to_string()];
        bus.subscribe(&topics, flaky.clone()).await.unwrap();
        bus.subscribe(&topics, steady.clone()).await.unwrap();

        let event = event();
        let err = bus.publish("t", &event).await.unwrap_err();
        assert!(matches!(err, ServiceError::Bus(_)));
        assert_eq!(steady.seen(), 1, "later subscribers still get the event");

        // The caller publishes again, as the outbox does after its backoff
        bus.publish("t", &event).await.unwrap();
        assert_eq!((flaky.seen(), steady.seen()), (2, 2));
    }

    #[tokio::test]
    async fn test_injected_publish_failure() {
        let bus = MemoryEventBus::new();
        bus.fail_next_publishes(1);

        let err = bus.publish("t", &event()).await.unwrap_err();
        assert!(matches!(err, ServiceError::PublishFailed(_)));
        assert!(bus.published("t").is_empty());

        bus.publish("t", &event()).await.unwrap();
        assert_eq!(bus.published("t").len(), 1);
    }

    #[tokio::test]
    async fn test_replay_redelivers_to_subscribers() {
        let bus = MemoryEventBus::new();
        let handler = CountingHandler::failing(0);
        bus.subscribe(&["t".to_string()], handler.clone())
            .await
            .unwrap();
        bus.publish("t", &event()).await.unwrap();
        bus.publish("other", &event()).await.unwrap();

        assert_eq!(bus.replay("t").await, 1);
        assert_eq!(handler.seen(), 2);
    }
}
