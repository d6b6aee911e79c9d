use super::to_outbox_event;
use crate::error::ServiceResult;
use async_trait::async_trait;
use event_schema::LifecycleEvent;
use std::sync::Arc;
use tracing::info;
use transactional_outbox::OutboxEvent;
use uuid::Uuid;

/// Account persistence with the outbox write in the same transaction
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Delete the account and enqueue `event` atomically. `false` if there was no account.
    async fn delete_with_event(&self, user_id: Uuid, event: &OutboxEvent) -> ServiceResult<bool>;
}

pub struct AccountService {
    store: Arc<dyn AccountStore>,
    source: String,
}

impl AccountService {
    pub fn new(store: Arc<dyn AccountStore>, source: impl Into<String>) -> Self {
        Self {
            store,
            source: source.into(),
        }
    }

    /// Delete an account and announce `user.deleted`.
    ///
    /// Succeeds once the local transaction commits; delivery to other
    /// services happens later through the outbox and never fails this call.
    pub async fn delete_user(&self, user_id: Uuid) -> ServiceResult<bool> {
        let event = LifecycleEvent::user_deleted(&self.source, user_id)?;
        let deleted = self
            .store
            .delete_with_event(user_id, &to_outbox_event(&event))
            .await?;

        if deleted {
            info!(
                user_id = %user_id,
                event_id = %event.dedup_key(),
                "Account deleted, user.deleted queued"
            );
        }
        Ok(deleted)
    }
}
