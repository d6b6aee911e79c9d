use crate::error::ServiceResult;
use crate::propagation::accounts::AccountStore;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;
use transactional_outbox::{OutboxEvent, SqlxOutboxRepository};
use uuid::Uuid;

/// `users` table, only as far as account deletion needs it
#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
    outbox: Arc<SqlxOutboxRepository>,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        let outbox = Arc::new(SqlxOutboxRepository::new(pool.clone()));
        Self { pool, outbox }
    }
}

#[async_trait]
impl AccountStore for PgAccountRepository {
    async fn delete_with_event(&self, user_id: Uuid, event: &OutboxEvent) -> ServiceResult<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            debug!(user_id = %user_id, "No account row to delete");
            tx.rollback().await?;
            return Ok(false);
        }

        self.outbox.insert(&mut tx, event).await?;
        tx.commit().await?;
        Ok(true)
    }
}
