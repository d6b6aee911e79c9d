//! In-memory stand-ins for the PostgreSQL stores.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use discovery_service::domain::Post;
use discovery_service::error::{ServiceError, ServiceResult};
use discovery_service::ledger::{MemoryViewLedger, ViewLedger};
use discovery_service::propagation::{AccountStore, Effect, EffectStore, PostWriter};
use idempotent_consumer::ProcessingResult;
use resilience::RetryConfig;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use transactional_outbox::{
    OutboxError, OutboxEvent, OutboxRepository, OutboxResult, PendingStats,
};
use uuid::Uuid;

/// Two attempts per publish, no sleeping worth mentioning
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 1,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

#[derive(Default)]
pub struct MemoryOutbox {
    events: Mutex<Vec<OutboxEvent>>,
}

impl MemoryOutbox {
    pub fn push(&self, event: OutboxEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn all(&self) -> Vec<OutboxEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn get(&self, id: Uuid) -> OutboxEvent {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .expect("event exists")
    }

    /// Pretend the backoff window has passed
    pub fn rewind_attempts(&self) {
        for event in self.events.lock().unwrap().iter_mut() {
            if let Some(at) = event.last_attempt_at {
                event.last_attempt_at = Some(at - chrono::Duration::minutes(10));
            }
        }
    }
}

#[async_trait]
impl OutboxRepository for MemoryOutbox {
    async fn fetch_due(&self, limit: i32, max_retries: i32) -> OutboxResult<Vec<OutboxEvent>> {
        let now = Utc::now();
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.is_publishable(max_retries, now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_id: Uuid) -> OutboxResult<()> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or(OutboxError::EventNotFound(event_id))?;
        event.published_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> OutboxResult<()> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or(OutboxError::EventNotFound(event_id))?;
        event.retry_count += 1;
        event.last_error = Some(error.to_string());
        event.last_attempt_at = Some(Utc::now());
        Ok(())
    }

    async fn pending_stats(&self, max_retries: i32) -> OutboxResult<PendingStats> {
        let events = self.events.lock().unwrap();
        let pending: Vec<&OutboxEvent> =
            events.iter().filter(|e| e.published_at.is_none()).collect();
        Ok(PendingStats {
            pending: pending.len() as i64,
            oldest_pending_age_seconds: pending
                .iter()
                .map(|e| (Utc::now() - e.created_at).num_seconds())
                .max()
                .unwrap_or(0),
            exhausted: pending
                .iter()
                .filter(|e| e.retry_count >= max_retries)
                .count() as i64,
        })
    }
}

pub struct MemoryAccountStore {
    users: Mutex<HashSet<Uuid>>,
    outbox: Arc<MemoryOutbox>,
}

impl MemoryAccountStore {
    pub fn new(outbox: Arc<MemoryOutbox>) -> Self {
        Self {
            users: Mutex::new(HashSet::new()),
            outbox,
        }
    }

    pub fn add_user(&self, user_id: Uuid) {
        self.users.lock().unwrap().insert(user_id);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn delete_with_event(&self, user_id: Uuid, event: &OutboxEvent) -> ServiceResult<bool> {
        if !self.users.lock().unwrap().remove(&user_id) {
            return Ok(false);
        }
        self.outbox.push(event.clone());
        Ok(true)
    }
}

pub struct MemoryPostWriter {
    posts: Mutex<HashMap<Uuid, Post>>,
    outbox: Arc<MemoryOutbox>,
}

impl MemoryPostWriter {
    pub fn new(outbox: Arc<MemoryOutbox>) -> Self {
        Self {
            posts: Mutex::new(HashMap::new()),
            outbox,
        }
    }

    pub fn stored(&self, post_id: Uuid) -> Option<Post> {
        self.posts.lock().unwrap().get(&post_id).cloned()
    }
}

#[async_trait]
impl PostWriter for MemoryPostWriter {
    async fn create_with_event(&self, post: &Post, event: &OutboxEvent) -> ServiceResult<()> {
        self.posts.lock().unwrap().insert(post.id, post.clone());
        self.outbox.push(event.clone());
        Ok(())
    }

    async fn delete_owned_with_event(
        &self,
        author_id: Uuid,
        post_id: Uuid,
        event: &OutboxEvent,
    ) -> ServiceResult<bool> {
        let mut posts = self.posts.lock().unwrap();
        match posts.get_mut(&post_id) {
            Some(post) if post.author_id == author_id && post.deleted_at.is_none() => {
                post.deleted_at = Some(Utc::now());
                self.outbox.push(event.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Processed-key log plus the view ledger the user.deleted cascade purges.
///
/// Counts how many times each effect actually changed state.
pub struct MemoryEffectStore {
    processed: Mutex<HashSet<String>>,
    views: Arc<MemoryViewLedger>,
    fail_commits: AtomicU32,
    purges: AtomicUsize,
    applied: AtomicUsize,
}

impl MemoryEffectStore {
    pub fn new(views: Arc<MemoryViewLedger>) -> Self {
        Self {
            processed: Mutex::new(HashSet::new()),
            views,
            fail_commits: AtomicU32::new(0),
            purges: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
        }
    }

    /// The next `n` applies fail at commit time
    pub fn fail_next_commits(&self, n: u32) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    pub fn purges(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EffectStore for MemoryEffectStore {
    async fn apply_once(
        &self,
        dedup_key: &str,
        _event_type: &str,
        effect: &Effect,
    ) -> ServiceResult<ProcessingResult> {
        if self.processed.lock().unwrap().contains(dedup_key) {
            return Ok(ProcessingResult::AlreadyProcessed);
        }

        let remaining = self.fail_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(ServiceError::ApplyConflict("commit failed".into()));
        }

        if let Effect::PurgeUser { user_id } = effect {
            if self.views.purge_viewer(*user_id).await? > 0 {
                self.purges.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.processed.lock().unwrap().insert(dedup_key.to_string());
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessingResult::Success)
    }
}
