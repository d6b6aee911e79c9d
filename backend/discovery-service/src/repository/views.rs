use crate::error::ServiceResult;
use crate::ledger::ViewLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::collections::HashSet;
use uuid::Uuid;

/// `post_views` table, unique on (viewer_id, post_id)
#[derive(Clone)]
pub struct PgViewLedger {
    pool: PgPool,
}

impl PgViewLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete a viewer's records inside the caller's transaction
    pub async fn purge_viewer_in(conn: &mut PgConnection, viewer_id: Uuid) -> ServiceResult<u64> {
        let result = sqlx::query("DELETE FROM post_views WHERE viewer_id = $1")
            .bind(viewer_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ViewLedger for PgViewLedger {
    async fn record_view(&self, viewer_id: Uuid, post_id: Uuid) -> ServiceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO post_views (viewer_id, post_id, viewed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (viewer_id, post_id) DO UPDATE SET viewed_at = EXCLUDED.viewed_at
            "#,
        )
        .bind(viewer_id)
        .bind(post_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn filter_unviewed(
        &self,
        viewer_id: Uuid,
        candidates: &HashSet<Uuid>,
    ) -> ServiceResult<HashSet<Uuid>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let ids: Vec<Uuid> = candidates.iter().copied().collect();
        let viewed: Vec<Uuid> = sqlx::query_scalar(
            "SELECT post_id FROM post_views WHERE viewer_id = $1 AND post_id = ANY($2)",
        )
        .bind(viewer_id)
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let viewed: HashSet<Uuid> = viewed.into_iter().collect();
        Ok(candidates.difference(&viewed).copied().collect())
    }

    async fn viewed_between(
        &self,
        viewer_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServiceResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT post_id
            FROM post_views
            WHERE viewer_id = $1 AND viewed_at >= $2 AND viewed_at < $3
            ORDER BY viewed_at ASC
            "#,
        )
        .bind(viewer_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn purge_viewer(&self, viewer_id: Uuid) -> ServiceResult<u64> {
        let mut conn = self.pool.acquire().await?;
        Self::purge_viewer_in(&mut *conn, viewer_id).await
    }
}
