use chrono::{DateTime, TimeZone, Utc};
/// Event Schema Registry for lifecycle events exchanged between services
///
/// Every message on a lifecycle topic is a [`LifecycleEvent`]. Payloads are
/// versioned through `schema_version` so consumers can reject messages they
/// do not understand instead of misapplying them.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for all events
pub const SCHEMA_VERSION: u32 = 1;

/// Event type tags
pub mod event_types {
    pub const USER_DELETED: &str = "user.deleted";
    pub const POST_CREATED: &str = "post.created";
    pub const POST_DELETED: &str = "post.deleted";
}

/// Immutable lifecycle event as it travels on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Explicit event identifier. Producers always set it; legacy producers did not.
    #[serde(default)]
    pub event_id: Option<Uuid>,
    /// Event type tag, e.g. `user.deleted`
    pub event_type: String,
    /// Entity the event is about
    pub subject_id: Uuid,
    /// Originating service
    pub source: String,
    /// Emission timestamp
    pub emitted_at: DateTime<Utc>,
    /// Schema version for compatibility checking
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Opaque, type-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl LifecycleEvent {
    pub fn new(
        event_type: impl Into<String>,
        subject_id: Uuid,
        source: impl Into<String>,
        payload: impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: Some(Uuid::new_v4()),
            event_type: event_type.into(),
            subject_id,
            source: source.into(),
            emitted_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Build a `user.deleted` event for an account removed by `source`
    pub fn user_deleted(source: impl Into<String>, user_id: Uuid) -> Result<Self, serde_json::Error> {
        let data = UserDeletedEvent {
            user_id,
            deleted_at: Utc::now(),
        };
        Self::new(event_types::USER_DELETED, user_id, source, data)
    }

    /// Build a `post.created` event
    pub fn post_created(
        source: impl Into<String>,
        data: PostCreatedEvent,
    ) -> Result<Self, serde_json::Error> {
        let post_id = data.post_id;
        Self::new(event_types::POST_CREATED, post_id, source, data)
    }

    /// Build a `post.deleted` event
    pub fn post_deleted(
        source: impl Into<String>,
        post_id: Uuid,
        author_id: Uuid,
    ) -> Result<Self, serde_json::Error> {
        let data = PostDeletedEvent {
            post_id,
            author_id,
            deleted_at: Utc::now(),
        };
        Self::new(event_types::POST_DELETED, post_id, source, data)
    }

    /// Key used by consumers to detect redeliveries.
    ///
    /// The explicit event id wins; otherwise the key is derived from
    /// (event type, subject, emission time in milliseconds).
    pub fn dedup_key(&self) -> String {
        match self.event_id {
            Some(id) => id.to_string(),
            None => format!(
                "{}:{}:{}",
                self.event_type,
                self.subject_id,
                self.emitted_at.timestamp_millis()
            ),
        }
    }

    /// Aggregate part of the event type (`user` for `user.deleted`)
    pub fn aggregate(&self) -> &str {
        self.event_type.split('.').next().unwrap_or("unknown")
    }

    /// Decode the payload into a typed event
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Parse a bus message.
    ///
    /// Accepts the current format and the legacy `{user_id, target_id, content}`
    /// message the user service used to emit on its `user_deleted` topic.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        if value.get("event_type").is_some() {
            return serde_json::from_value(value);
        }

        let legacy: LegacyUserMessage = serde_json::from_value(value)?;
        Ok(Self {
            event_id: None,
            event_type: event_types::USER_DELETED.to_string(),
            subject_id: legacy.target_id,
            source: "user-service".to_string(),
            emitted_at: Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now),
            schema_version: SCHEMA_VERSION,
            payload: serde_json::to_value(UserDeletedEvent {
                user_id: legacy.target_id,
                deleted_at: Utc::now(),
            })?,
        })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Message shape published by the old user service
#[derive(Debug, Deserialize)]
struct LegacyUserMessage {
    #[allow(dead_code)]
    user_id: Uuid,
    target_id: Uuid,
    #[allow(dead_code)]
    #[serde(default)]
    content: String,
}

// ============================================================================
// USER SERVICE EVENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDeletedEvent {
    pub user_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

// ============================================================================
// POST SERVICE EVENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostCreatedEvent {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub content_ref: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDeletedEvent {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

// ============================================================================
// Version compatibility helpers
// ============================================================================

pub fn is_compatible(current_version: u32, message_version: u32) -> bool {
    // Exact match until a second schema version exists
    current_version == message_version
}
