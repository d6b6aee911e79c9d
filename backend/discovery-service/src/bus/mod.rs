//! Event bus seam. At-least-once: a handler error leaves the message
//! unacknowledged and it is delivered again.

pub mod kafka;
pub mod memory;

pub use kafka::KafkaEventBus;
pub use memory::MemoryEventBus;

use crate::error::ServiceResult;
use async_trait::async_trait;
use event_schema::LifecycleEvent;
use std::sync::Arc;

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// `Ok` acknowledges the message; `Err` asks for redelivery
    async fn handle(&self, event: &LifecycleEvent) -> ServiceResult<()>;
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Returns once the bus acknowledged the message, else `PublishFailed`
    async fn publish(&self, topic: &str, event: &LifecycleEvent) -> ServiceResult<()>;

    /// Start delivering messages from `topics` to `handler`
    async fn subscribe(&self, topics: &[String], handler: Arc<dyn EventHandler>)
        -> ServiceResult<()>;
}

/// `{prefix}.{aggregate}.events`, e.g. `serendip.user.events` for `user.deleted`
pub fn topic_for(prefix: &str, event_type: &str) -> String {
    let aggregate = event_type.split('.').next().unwrap_or(event_type);
    format!("{}.{}.events", prefix, aggregate)
}

/// Unprefixed topic the old user service still publishes account deletions
/// on, as bare `{user_id, target_id, content}` messages
pub const LEGACY_USER_DELETED_TOPIC: &str = "user_deleted";

/// Topics carrying the lifecycle events this service consumes
pub fn lifecycle_topics(prefix: &str) -> Vec<String> {
    vec![
        topic_for(prefix, event_schema::event_types::USER_DELETED),
        topic_for(prefix, event_schema::event_types::POST_DELETED),
        LEGACY_USER_DELETED_TOPIC.to_string(),
    ]
}
