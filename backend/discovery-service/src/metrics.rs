//! Prometheus metrics for discovery-service.
//!
//! Outbox gauges and counters live in `transactional_outbox::metrics`; this
//! module covers queries, bus publishing and lifecycle consumption.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Proximity query latency by kind (near, near_unviewed).
    pub static ref PROXIMITY_QUERY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "proximity_query_duration_seconds",
        "Proximity query duration segmented by query kind",
        &["kind"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("failed to register proximity_query_duration_seconds");

    /// Lifecycle events seen by the consumer, by type and outcome
    /// (applied, skipped, ignored, failed).
    pub static ref LIFECYCLE_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lifecycle_events_total",
        "Lifecycle events consumed segmented by event type and outcome",
        &["event_type", "outcome"]
    )
    .expect("failed to register lifecycle_events_total");

    /// Bus publish attempts by result (ok, error).
    pub static ref BUS_PUBLISH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "bus_publish_total",
        "Event bus publish attempts segmented by result",
        &["result"]
    )
    .expect("failed to register bus_publish_total");
}

pub fn record_lifecycle(event_type: &str, outcome: &str) {
    LIFECYCLE_EVENTS_TOTAL
        .with_label_values(&[event_type, outcome])
        .inc();
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
