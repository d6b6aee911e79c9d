//! Prometheus view of the lifecycle outbox.

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use tracing::warn;

use crate::PendingStats;

#[derive(Clone)]
pub struct OutboxMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    /// Rows past `max_retries`, waiting for a manual replay
    pub exhausted: IntGauge,
    pub published: IntCounter,
    pub publish_failures: IntCounter,
}

impl OutboxMetrics {
    /// Build the collectors and add them to `registry`.
    ///
    /// A collector that is already registered (a second processor in the same
    /// process) is logged and left out; the handles still work locally.
    pub fn register(registry: &Registry, service: &str) -> prometheus::Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).const_label("service", service.to_string())
        };

        let metrics = Self {
            pending: IntGauge::with_opts(opts(
                "lifecycle_outbox_pending",
                "Lifecycle events written but not yet acknowledged by the bus",
            ))?,
            oldest_pending_age_seconds: IntGauge::with_opts(opts(
                "lifecycle_outbox_oldest_pending_age_seconds",
                "Age of the oldest unacknowledged lifecycle event",
            ))?,
            exhausted: IntGauge::with_opts(opts(
                "lifecycle_outbox_exhausted",
                "Lifecycle events that used up their publish retries",
            ))?,
            published: IntCounter::with_opts(opts(
                "lifecycle_outbox_published_total",
                "Lifecycle events acknowledged by the bus",
            ))?,
            publish_failures: IntCounter::with_opts(opts(
                "lifecycle_outbox_publish_failures_total",
                "Failed attempts to hand a lifecycle event to the bus",
            ))?,
        };

        let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
            Box::new(metrics.pending.clone()),
            Box::new(metrics.oldest_pending_age_seconds.clone()),
            Box::new(metrics.exhausted.clone()),
            Box::new(metrics.published.clone()),
            Box::new(metrics.publish_failures.clone()),
        ];
        for collector in collectors {
            if let Err(e) = registry.register(collector) {
                warn!(error = %e, "Outbox metric not registered");
            }
        }

        Ok(metrics)
    }

    pub fn observe(&self, stats: &PendingStats) {
        self.pending.set(stats.pending);
        self.oldest_pending_age_seconds
            .set(stats.oldest_pending_age_seconds);
        self.exhausted.set(stats.exhausted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_gauges_follow_stats() {
        let registry = Registry::new();
        let metrics = OutboxMetrics::register(&registry, "discovery_service").unwrap();

        metrics.observe(&PendingStats {
            pending: 12,
            oldest_pending_age_seconds: 90,
            exhausted: 3,
        });

        assert_eq!(metrics.pending.get(), 12);
        assert_eq!(metrics.exhausted.get(), 3);
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"lifecycle_outbox_exhausted".to_string()));
    }
}
