use super::ViewLedger;
use crate::error::ServiceResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// In-process ledger; one shard entry per viewer.
#[derive(Default)]
pub struct MemoryViewLedger {
    views: DashMap<Uuid, HashMap<Uuid, DateTime<Utc>>>,
}

impl MemoryViewLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, viewer_id: Uuid, post_id: Uuid, viewed_at: DateTime<Utc>) {
        self.views
            .entry(viewer_id)
            .or_default()
            .insert(post_id, viewed_at);
    }

    /// Backdated view, for month queries in tests
    #[cfg(test)]
    pub(crate) fn record_view_at(&self, viewer_id: Uuid, post_id: Uuid, viewed_at: DateTime<Utc>) {
        self.insert(viewer_id, post_id, viewed_at);
    }

    pub fn view_count(&self, viewer_id: Uuid) -> usize {
        self.views.get(&viewer_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ViewLedger for MemoryViewLedger {
    async fn record_view(&self, viewer_id: Uuid, post_id: Uuid) -> ServiceResult<()> {
        self.insert(viewer_id, post_id, Utc::now());
        Ok(())
    }

    async fn filter_unviewed(
        &self,
        viewer_id: Uuid,
        candidates: &HashSet<Uuid>,
    ) -> ServiceResult<HashSet<Uuid>> {
        let Some(seen) = self.views.get(&viewer_id) else {
            return Ok(candidates.clone());
        };
        Ok(candidates
            .iter()
            .filter(|id| !seen.contains_key(id))
            .copied()
            .collect())
    }

    async fn viewed_between(
        &self,
        viewer_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServiceResult<Vec<Uuid>> {
        let Some(seen) = self.views.get(&viewer_id) else {
            return Ok(Vec::new());
        };
        let mut in_range: Vec<(DateTime<Utc>, Uuid)> = seen
            .iter()
            .filter(|(_, at)| **at >= from && **at < to)
            .map(|(id, at)| (*at, *id))
            .collect();
        in_range.sort();
        Ok(in_range.into_iter().map(|(_, id)| id).collect())
    }

    async fn purge_viewer(&self, viewer_id: Uuid) -> ServiceResult<u64> {
        Ok(self
            .views
            .remove(&viewer_id)
            .map(|(_, seen)| seen.len() as u64)
            .unwrap_or(0))
    }
}
