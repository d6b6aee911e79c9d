//! Short-lived in-process record of recently applied event keys.
//!
//! Only a fast path: a miss here says nothing, the persistent
//! `processed_events` log stays authoritative.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Concurrent TTL set of dedup keys
pub struct SeenSet {
    entries: DashMap<String, Instant>,
    ttl: Duration,
    capacity: usize,
}

impl SeenSet {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
        }
    }

    /// True if `key` was recorded within the TTL
    pub fn contains(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(seen_at) => seen_at.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Record `key`. Returns `false` if it was already present and fresh.
    pub fn insert(&self, key: &str) -> bool {
        if self.entries.len() >= self.capacity {
            self.purge_expired();
        }
        if self.entries.len() >= self.capacity {
            // Still full: drop everything rather than grow without bound
            debug!(capacity = self.capacity, "Seen-set full, clearing");
            self.entries.clear();
        }

        let now = Instant::now();
        match self.entries.insert(key.to_string(), now) {
            Some(previous) => previous.elapsed() >= self.ttl,
            None => true,
        }
    }

    /// Remove expired keys, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, seen_at| seen_at.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let set = SeenSet::new(Duration::from_secs(60), 16);

        assert!(!set.contains("evt-1"));
        assert!(set.insert("evt-1"));
        assert!(set.contains("evt-1"));
        assert!(!set.insert("evt-1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_expired_keys_are_forgotten() {
        let set = SeenSet::new(Duration::from_millis(0), 16);

        set.insert("evt-1");
        assert!(!set.contains("evt-1"));
        assert_eq!(set.purge_expired(), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let set = SeenSet::new(Duration::from_secs(60), 4);

        for i in 0..10 {
            set.insert(&format!("evt-{i}"));
        }
        assert!(set.len() <= 4);
        assert!(set.contains("evt-9"));
    }
}
