//! # Idempotent Event Consumer Library
//!
//! Applies lifecycle events at most once in observable effect, even though the
//! bus delivers them at least once. PostgreSQL holds the processed-event log;
//! an optional in-process [`SeenSet`] short-circuits hot replays before they
//! reach the database.
//!
//! ## Architecture
//!
//! ```text
//! Bus → Consumer → SeenSet (fast path) → IdempotencyGuard → Effect → Database
//!                                              ↓
//!                                   processed_events (same tx)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use idempotent_consumer::{IdempotencyGuard, ProcessingResult};
//! use std::time::Duration;
//!
//! let guard = IdempotencyGuard::new(pool, Duration::from_secs(7 * 86400));
//!
//! let result = guard
//!     .process_in_transaction(&event.dedup_key(), None, |tx| {
//!         Box::pin(async move {
//!             sqlx::query("DELETE FROM post_views WHERE viewer_id = $1")
//!                 .bind(user_id)
//!                 .execute(&mut **tx)
//!                 .await?;
//!             Ok(())
//!         })
//!     })
//!     .await?;
//! ```
//!
//! ## Concurrency Safety
//!
//! The effect and the processed marker commit in one transaction. When two
//! consumers race on the same key, the second `INSERT ... ON CONFLICT DO
//! NOTHING` waits for the first commit, affects zero rows and rolls its own
//! effect back, so the event is observed as applied once.
//!
//! The effect itself must still be idempotent: the dedup log is retained
//! for a bounded window, and crash-recovery gaps can replay an event.

use anyhow::Context;
use chrono::Utc;
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info, warn};

mod error;
mod seen_set;

pub use error::{IdempotencyError, IdempotencyResult};
pub use seen_set::SeenSet;

/// Result of processing an event with idempotency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
    /// Event was processed successfully (first time)
    Success,

    /// Event was already processed before (duplicate)
    AlreadyProcessed,

    /// Event processing failed with error message
    Failed(String),
}

impl ProcessingResult {
    /// Check if processing was successful (either first time or already processed)
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            ProcessingResult::Success | ProcessingResult::AlreadyProcessed
        )
    }
}

/// Idempotency guard backed by the `processed_events` table
///
/// Cheap to clone; share it across consumer tasks.
#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: PgPool,
    retention_duration: Duration,
}

impl IdempotencyGuard {
    /// Create a new idempotency guard
    ///
    /// `retention_duration` bounds how long processed keys are remembered.
    /// It must exceed the longest redelivery window of the bus.
    pub fn new(pool: PgPool, retention_duration: Duration) -> Self {
        Self {
            pool,
            retention_duration,
        }
    }

    /// Apply an effect and record the event as processed in one transaction
    ///
    /// `received → dedup check → skip | apply → mark processed → commit`.
    ///
    /// - `AlreadyProcessed`: the key was present (or a concurrent consumer
    ///   committed it first); the effect is rolled back.
    /// - `Failed`: the effect returned an error; nothing was committed.
    /// - `Err(IdempotencyError::CommitFailed)`: the commit itself failed;
    ///   the caller must leave the event unacknowledged.
    pub async fn process_in_transaction<F>(
        &self,
        event_id: &str,
        metadata: Option<serde_json::Value>,
        apply: F,
    ) -> IdempotencyResult<ProcessingResult>
    where
        F: for<'t> FnOnce(
            &'t mut Transaction<'static, Postgres>,
        ) -> BoxFuture<'t, Result<(), anyhow::Error>>,
    {
        Self::validate_event_id(event_id)?;

        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to check if event is processed")?;

        if exists {
            debug!(event_id = %event_id, "Event already processed, skipping");
            tx.rollback().await?;
            return Ok(ProcessingResult::AlreadyProcessed);
        }

        if let Err(e) = apply(&mut tx).await {
            warn!(event_id = %event_id, error = ?e, "Event effect failed, rolling back");
            tx.rollback().await?;
            return Ok(ProcessingResult::Failed(e.to_string()));
        }

        if !Self::insert_marker(&mut *tx, event_id, metadata.as_ref()).await? {
            debug!(
                event_id = %event_id,
                "Concurrent consumer processed event first, rolling back"
            );
            tx.rollback().await?;
            return Ok(ProcessingResult::AlreadyProcessed);
        }

        tx.commit()
            .await
            .map_err(|e| IdempotencyError::CommitFailed(e.to_string()))?;

        info!(event_id = %event_id, "Event applied and marked as processed");
        Ok(ProcessingResult::Success)
    }

    /// Delete processed markers older than the retention window
    pub async fn cleanup_old_events(&self) -> IdempotencyResult<u64> {
        let cutoff_time = Utc::now()
            - chrono::Duration::from_std(self.retention_duration).map_err(|e| {
                IdempotencyError::Other(anyhow::anyhow!("Invalid retention duration: {}", e))
            })?;

        let result = sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE processed_at < $1
            "#,
        )
        .bind(cutoff_time)
        .execute(&self.pool)
        .await
        .context("Failed to cleanup old events")?;

        let deleted_count = result.rows_affected();

        if deleted_count > 0 {
            info!(
                deleted_count = deleted_count,
                cutoff_time = %cutoff_time,
                "Cleaned up old processed events"
            );
        } else {
            debug!("No old events to cleanup");
        }

        Ok(deleted_count)
    }

    async fn insert_marker(
        conn: &mut sqlx::PgConnection,
        event_id: &str,
        metadata: Option<&serde_json::Value>,
    ) -> IdempotencyResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, metadata, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(metadata)
        .execute(conn)
        .await
        .context("Failed to mark event as processed")?;

        Ok(result.rows_affected() > 0)
    }

    /// Validate event_id format
    fn validate_event_id(event_id: &str) -> IdempotencyResult<()> {
        if event_id.is_empty() {
            return Err(IdempotencyError::InvalidEventId(
                "Event ID cannot be empty".to_string(),
            ));
        }

        if event_id.len() > 255 {
            return Err(IdempotencyError::InvalidEventId(format!(
                "Event ID too long: {} characters (max 255)",
                event_id.len()
            )));
        }

        Ok(())
    }
}
