use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::processor::MAX_RETRY_DELAY;
use crate::{OutboxError, OutboxEvent, OutboxResult};

/// Backlog summary for `/outbox/stats` and the pending gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingStats {
    /// Unpublished rows, including exhausted ones
    pub pending: i64,
    /// Seconds since the oldest unpublished row was written, 0 when none
    pub oldest_pending_age_seconds: i64,
    /// Unpublished rows that ran out of retries and wait for a replay
    pub exhausted: i64,
}

/// What the processor needs from the outbox table.
///
/// Rows are written by [`SqlxOutboxRepository::insert`] inside the caller's
/// transaction, so writing is not part of the trait.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Up to `limit` rows the processor may try now, oldest first.
    ///
    /// Excludes published rows, rows with `retry_count >= max_retries` and
    /// rows whose backoff (see [`crate::retry_delay`]) has not elapsed, so a
    /// pile of dead rows can never crowd fresh ones out of the batch.
    async fn fetch_due(&self, limit: i32, max_retries: i32) -> OutboxResult<Vec<OutboxEvent>>;

    async fn mark_published(&self, event_id: Uuid) -> OutboxResult<()>;

    /// Count a failed attempt and remember why it failed
    async fn mark_failed(&self, event_id: Uuid, error: &str) -> OutboxResult<()>;

    async fn pending_stats(&self, max_retries: i32) -> OutboxResult<PendingStats>;
}

pub struct SqlxOutboxRepository {
    pool: PgPool,
}

fn decode(row: PgRow) -> Result<OutboxEvent, sqlx::Error> {
    Ok(OutboxEvent {
        id: row.try_get("id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        published_at: row.try_get("published_at")?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
    })
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append `event` inside the transaction that performs the mutation.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> OutboxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, aggregate_type, aggregate_id, event_type, payload, metadata,
                 created_at, published_at, retry_count, last_error, last_attempt_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.metadata)
        .bind(event.created_at)
        .bind(event.published_at)
        .bind(event.retry_count)
        .bind(&event.last_error)
        .bind(event.last_attempt_at)
        .execute(&mut **tx)
        .await
        .context("Failed to append lifecycle event to outbox")?;

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            subject_id = %event.aggregate_id,
            "Lifecycle event queued in outbox"
        );
        Ok(())
    }

    /// Queue every row written since `ts` again, published or not.
    pub async fn replay_since(&self, ts: DateTime<Utc>) -> OutboxResult<u64> {
        let done = sqlx::query(
            r#"
            UPDATE outbox_events
            SET published_at = NULL, retry_count = 0, last_error = NULL, last_attempt_at = NULL
            WHERE created_at >= $1
            "#,
        )
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("Failed to requeue outbox rows by time")?;
        Ok(done.rows_affected())
    }

    /// Queue the rows with ids in `[from_id, to_id]` again.
    pub async fn replay_range(&self, from_id: Uuid, to_id: Uuid) -> OutboxResult<u64> {
        let done = sqlx::query(
            r#"
            UPDATE outbox_events
            SET published_at = NULL, retry_count = 0, last_error = NULL, last_attempt_at = NULL
            WHERE id BETWEEN $1 AND $2
            "#,
        )
        .bind(from_id)
        .bind(to_id)
        .execute(&self.pool)
        .await
        .context("Failed to requeue outbox rows by id")?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn fetch_due(&self, limit: i32, max_retries: i32) -> OutboxResult<Vec<OutboxEvent>> {
        // Same schedule as `retry_delay`: 2^retry_count seconds, capped
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload, metadata,
                   created_at, published_at, retry_count, last_error, last_attempt_at
            FROM outbox_events
            WHERE published_at IS NULL
              AND retry_count < $2
              AND (
                  last_attempt_at IS NULL
                  OR last_attempt_at
                     + LEAST(POWER(2, LEAST(GREATEST(retry_count, 0), 16)), $3)
                       * INTERVAL '1 second'
                     <= NOW()
              )
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(max_retries)
        .bind(MAX_RETRY_DELAY.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch due outbox rows")?;

        let events = rows
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to decode outbox rows")?;

        debug!(count = events.len(), "Fetched due outbox rows");
        Ok(events)
    }

    async fn mark_published(&self, event_id: Uuid) -> OutboxResult<()> {
        let done = sqlx::query("UPDATE outbox_events SET published_at = NOW() WHERE id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .context("Failed to mark outbox row published")?;

        if done.rows_affected() == 0 {
            warn!(event_id = %event_id, "Outbox row vanished before it could be marked published");
            return Err(OutboxError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> OutboxResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1, last_error = $2, last_attempt_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to record outbox publish failure")?;

        if done.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn pending_stats(&self, max_retries: i32) -> OutboxResult<PendingStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COUNT(*) FILTER (WHERE retry_count >= $1)::BIGINT AS exhausted,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT, 0) AS age
            FROM outbox_events
            WHERE published_at IS NULL
            "#,
        )
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await
        .context("Failed to summarize outbox backlog")?;

        Ok(PendingStats {
            pending: row.try_get("pending")?,
            oldest_pending_age_seconds: row.try_get("age")?,
            exhausted: row.try_get("exhausted")?,
        })
    }
}
