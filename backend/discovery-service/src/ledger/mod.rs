//! Per-viewer record of which posts have been seen.

mod memory;

pub use memory::MemoryViewLedger;

use crate::domain::month_bounds;
use crate::error::ServiceResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Unknown viewers are simply empty: no operation errors for them.
/// Writes by a viewer are visible to that viewer's next read.
#[async_trait]
pub trait ViewLedger: Send + Sync {
    /// Idempotent; a repeat view only refreshes `viewed_at`
    async fn record_view(&self, viewer_id: Uuid, post_id: Uuid) -> ServiceResult<()>;

    /// `candidates` minus everything `viewer_id` has seen
    async fn filter_unviewed(
        &self,
        viewer_id: Uuid,
        candidates: &HashSet<Uuid>,
    ) -> ServiceResult<HashSet<Uuid>>;

    /// Posts viewed in `[from, to)`, oldest view first
    async fn viewed_between(
        &self,
        viewer_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServiceResult<Vec<Uuid>>;

    /// Drop every record of `viewer_id`. Only for the account-deletion cascade.
    async fn purge_viewer(&self, viewer_id: Uuid) -> ServiceResult<u64>;

    /// Posts viewed during a calendar month (UTC), oldest view first
    async fn viewed_in_month(
        &self,
        viewer_id: Uuid,
        year: i32,
        month: u32,
    ) -> ServiceResult<Vec<Uuid>> {
        let (from, to) = month_bounds(year, month)?;
        self.viewed_between(viewer_id, from, to).await
    }
}
