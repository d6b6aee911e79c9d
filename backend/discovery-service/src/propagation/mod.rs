//! Cross-service lifecycle propagation.
//!
//! Producers write the event to the outbox in the same transaction as the
//! mutation; the outbox worker hands it to the bus through [`BusPublisher`].
//! [`LifecycleConsumer`] applies incoming events at most once.

pub mod accounts;
pub mod consumer;
pub mod posts;
pub mod publisher;

pub use accounts::{AccountService, AccountStore};
pub use consumer::{Effect, EffectStore, LifecycleConsumer, PgEffectStore};
pub use posts::{PostCommands, PostWriter};
pub use publisher::{publish_best_effort, BusPublisher};

use event_schema::{LifecycleEvent, SCHEMA_VERSION};
use transactional_outbox::OutboxEvent;

/// Outbox row for `event`; the row id doubles as the event id on the bus
pub fn to_outbox_event(event: &LifecycleEvent) -> OutboxEvent {
    let mut row = OutboxEvent::new(
        event.aggregate(),
        event.subject_id,
        event.event_type.clone(),
        event.payload.clone(),
    )
    .with_metadata(serde_json::json!({
        "source": event.source,
        "schema_version": event.schema_version,
    }));

    if let Some(id) = event.event_id {
        row.id = id;
    }
    row.created_at = event.emitted_at;
    row
}

/// Rebuild the bus event from a drained outbox row
pub fn from_outbox_event(row: &OutboxEvent, default_source: &str) -> LifecycleEvent {
    let metadata = row.metadata.as_ref();
    let source = metadata
        .and_then(|m| m.get("source"))
        .and_then(|v| v.as_str())
        .unwrap_or(default_source)
        .to_string();
    let schema_version = metadata
        .and_then(|m| m.get("schema_version"))
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(SCHEMA_VERSION);

    LifecycleEvent {
        event_id: Some(row.id),
        event_type: row.event_type.clone(),
        subject_id: row.aggregate_id,
        source,
        emitted_at: row.created_at,
        schema_version,
        payload: row.payload.clone(),
    }
}
