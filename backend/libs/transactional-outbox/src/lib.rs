//! Outbox for lifecycle events.
//!
//! A `user.deleted` or `post.deleted` row is written in the same transaction
//! as the delete it announces, so the local commit never depends on the bus.
//! [`OutboxProcessor`] later drains rows that are due, hands each one to an
//! [`OutboxPublisher`] and marks it published once the bus acknowledged it.
//!
//! A row can be sent twice (acked, then the mark fails), so consumers dedup
//! on the row id. Rows that fail `max_retries` times stay in the table until
//! an operator replays them with `outbox-cli`.
//!
//! ```rust,ignore
//! let mut tx = pool.begin().await?;
//! let gone = sqlx::query("DELETE FROM users WHERE id = $1")
//!     .bind(user_id)
//!     .execute(&mut *tx)
//!     .await?;
//! if gone.rows_affected() > 0 {
//!     let row = OutboxEvent::new("user", user_id, "user.deleted", payload);
//!     outbox.insert(&mut tx, &row).await?;
//! }
//! tx.commit().await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod error;
pub mod metrics;
mod processor;
mod store;

pub use error::{OutboxError, OutboxResult};
pub use processor::{is_due, retry_delay, OutboxProcessor, OutboxPublisher, MAX_RETRY_DELAY};
pub use store::{OutboxRepository, PendingStats, SqlxOutboxRepository};

/// One pending or published lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Also the event id seen by consumers
    pub id: Uuid,
    /// `user` or `post`
    pub aggregate_type: String,
    /// The deleted or created entity
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Source service and schema version
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Set once the bus acknowledged the event
    pub published_at: Option<DateTime<Utc>>,
    /// Failed publish attempts so far
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            event_type: event_type.into(),
            payload,
            metadata: None,
            created_at: Utc::now(),
            published_at: None,
            retry_count: 0,
            last_error: None,
            last_attempt_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether the processor should try this row at `now`
    pub fn is_publishable(&self, max_retries: i32, now: DateTime<Utc>) -> bool {
        self.published_at.is_none() && self.retry_count < max_retries && is_due(self, now)
    }
}
