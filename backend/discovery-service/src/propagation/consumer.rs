//! Idempotent lifecycle event consumer.
//!
//! `received → seen? → decode → apply + mark processed (one transaction) → ack`.
//! Any error before the commit leaves the message unacknowledged so the bus
//! redelivers it; the processed-event log makes the retry harmless.

use crate::bus::EventHandler;
use crate::domain::{Coordinate, Post};
use crate::error::{ServiceError, ServiceResult};
use crate::geo::GeoIndex;
use crate::metrics::record_lifecycle;
use crate::repository::{PgPostRepository, PgViewLedger};
use async_trait::async_trait;
use event_schema::{event_types, is_compatible, LifecycleEvent, PostCreatedEvent, SCHEMA_VERSION};
use idempotent_consumer::{IdempotencyError, IdempotencyGuard, ProcessingResult, SeenSet};
use resilience::with_timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Local state change an event calls for. Every effect is idempotent on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// `user.deleted`: purge the user's view records, tombstone their posts
    PurgeUser { user_id: Uuid },
    /// `post.deleted`
    TombstonePost { post_id: Uuid },
    /// `post.created`
    IndexPost(Post),
}

impl Effect {
    /// `Ok(None)` for event types this service does not act on
    pub fn from_event(event: &LifecycleEvent) -> ServiceResult<Option<Effect>> {
        match event.event_type.as_str() {
            event_types::USER_DELETED => Ok(Some(Effect::PurgeUser {
                user_id: event.subject_id,
            })),
            event_types::POST_DELETED => Ok(Some(Effect::TombstonePost {
                post_id: event.subject_id,
            })),
            event_types::POST_CREATED => {
                let data: PostCreatedEvent = event.decode().map_err(|e| {
                    ServiceError::InvalidInput(format!("malformed post.created payload: {}", e))
                })?;
                Ok(Some(Effect::IndexPost(Post {
                    id: data.post_id,
                    author_id: data.author_id,
                    coordinate: Coordinate::new(data.latitude, data.longitude)?,
                    content_ref: data.content_ref,
                    created_at: data.created_at,
                    deleted_at: None,
                })))
            }
            _ => Ok(None),
        }
    }
}

/// Durable side of the consumer
#[async_trait]
pub trait EffectStore: Send + Sync {
    /// Apply `effect` and record `dedup_key` as processed, atomically.
    ///
    /// A commit failure is `ApplyConflict`: nothing was recorded.
    async fn apply_once(
        &self,
        dedup_key: &str,
        event_type: &str,
        effect: &Effect,
    ) -> ServiceResult<ProcessingResult>;
}

/// PostgreSQL effect store; effect and marker share one transaction
pub struct PgEffectStore {
    guard: IdempotencyGuard,
}

impl PgEffectStore {
    pub fn new(guard: IdempotencyGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl EffectStore for PgEffectStore {
    async fn apply_once(
        &self,
        dedup_key: &str,
        event_type: &str,
        effect: &Effect,
    ) -> ServiceResult<ProcessingResult> {
        let effect = effect.clone();
        let metadata = serde_json::json!({ "event_type": event_type });

        let result = self
            .guard
            .process_in_transaction(dedup_key, Some(metadata), move |tx| {
                Box::pin(async move {
                    match effect {
                        Effect::PurgeUser { user_id } => {
                            let views = PgViewLedger::purge_viewer_in(&mut **tx, user_id).await?;
                            let posts =
                                PgPostRepository::tombstone_by_author_in(&mut **tx, user_id)
                                    .await?;
                            debug!(user_id = %user_id, views, posts, "Purged deleted user");
                        }
                        Effect::TombstonePost { post_id } => {
                            PgPostRepository::tombstone_in(&mut **tx, post_id).await?;
                        }
                        Effect::IndexPost(post) => {
                            PgPostRepository::insert_in(&mut **tx, &post).await?;
                        }
                    }
                    Ok(())
                })
            })
            .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(IdempotencyError::CommitFailed(msg)) => Err(ServiceError::ApplyConflict(msg)),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct LifecycleConsumer {
    store: Arc<dyn EffectStore>,
    /// In-process index to keep in step, if one serves queries
    local_index: Option<Arc<dyn GeoIndex>>,
    seen: SeenSet,
    handler_timeout: Duration,
}

impl LifecycleConsumer {
    pub fn new(
        store: Arc<dyn EffectStore>,
        local_index: Option<Arc<dyn GeoIndex>>,
        seen: SeenSet,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            store,
            local_index,
            seen,
            handler_timeout,
        }
    }

    async fn mirror(&self, effect: &Effect) -> ServiceResult<()> {
        let Some(index) = &self.local_index else {
            return Ok(());
        };
        match effect {
            Effect::PurgeUser { user_id } => {
                index.remove_by_author(*user_id).await?;
            }
            Effect::TombstonePost { post_id } => {
                index.remove(*post_id).await?;
            }
            Effect::IndexPost(post) => index.upsert(post).await?,
        }
        Ok(())
    }

    async fn apply(
        &self,
        key: &str,
        event_type: &str,
        effect: &Effect,
    ) -> ServiceResult<ProcessingResult> {
        let result = self.store.apply_once(key, event_type, effect).await?;
        // Also on AlreadyProcessed: the durable log may be shared with other
        // instances while this index is not
        if result.is_ok() {
            self.mirror(effect).await?;
        }
        Ok(result)
    }
}

#[async_trait]
impl EventHandler for LifecycleConsumer {
    async fn handle(&self, event: &LifecycleEvent) -> ServiceResult<()> {
        let key = event.dedup_key();
        let event_type = event.event_type.as_str();

        if self.seen.contains(&key) {
            debug!(event_key = %key, event_type, "Recently applied, skipping");
            record_lifecycle(event_type, "skipped");
            return Ok(());
        }

        if !is_compatible(SCHEMA_VERSION, event.schema_version) {
            warn!(
                event_key = %key,
                event_type,
                schema_version = event.schema_version,
                "Unsupported schema version, ignoring"
            );
            record_lifecycle(event_type, "ignored");
            return Ok(());
        }

        let effect = match Effect::from_event(event) {
            Ok(Some(effect)) => effect,
            Ok(None) => {
                debug!(event_key = %key, event_type, "Unknown event type, ignoring");
                record_lifecycle(event_type, "ignored");
                return Ok(());
            }
            Err(e) => {
                // Redelivery cannot fix a bad payload
                warn!(event_key = %key, event_type, error = %e, "Dropping malformed event");
                record_lifecycle(event_type, "failed");
                return Ok(());
            }
        };

        let outcome = match with_timeout(self.handler_timeout, self.apply(&key, event_type, &effect))
            .await
        {
            Ok(outcome) => outcome,
            Err(elapsed) => Err(ServiceError::from(elapsed)),
        };

        match outcome {
            Ok(ProcessingResult::Success) => {
                info!(event_key = %key, event_type, subject_id = %event.subject_id, "Lifecycle event applied");
                record_lifecycle(event_type, "applied");
            }
            Ok(ProcessingResult::AlreadyProcessed) => {
                debug!(event_key = %key, event_type, "Lifecycle event already applied");
                record_lifecycle(event_type, "skipped");
            }
            Ok(ProcessingResult::Failed(msg)) => {
                record_lifecycle(event_type, "failed");
                return Err(ServiceError::ApplyConflict(msg));
            }
            Err(e) => {
                warn!(event_key = %key, event_type, error = %e, "Lifecycle event not applied");
                record_lifecycle(event_type, "failed");
                return Err(e);
            }
        }

        self.seen.insert(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_effect_for_user_deleted() {
        let user_id = Uuid::new_v4();
        let event = LifecycleEvent::user_deleted("user-service", user_id).unwrap();
        assert_eq!(
            Effect::from_event(&event).unwrap(),
            Some(Effect::PurgeUser { user_id })
        );
    }

    #[test]
    fn test_effect_for_post_created_validates_coordinate() {
        let mut data = PostCreatedEvent {
            post_id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            latitude: 37.5,
            longitude: 127.0,
            content_ref: "img/a.jpg".into(),
            created_at: Utc::now(),
        };
        let event = LifecycleEvent::post_created("post-service", data.clone()).unwrap();
        match Effect::from_event(&event).unwrap() {
            Some(Effect::IndexPost(post)) => {
                assert_eq!(post.id, data.post_id);
                assert_eq!(post.coordinate.latitude(), 37.5);
            }
            other => panic!("unexpected effect: {:?}", other),
        }

        data.latitude = 123.0;
        let event = LifecycleEvent::post_created("post-service", data).unwrap();
        assert!(matches!(
            Effect::from_event(&event),
            Err(ServiceError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn test_unknown_event_type_has_no_effect() {
        let event =
            LifecycleEvent::new("comment.created", Uuid::new_v4(), "comment-service", ()).unwrap();
        assert_eq!(Effect::from_event(&event).unwrap(), None);
    }
}
