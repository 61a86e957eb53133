//! Metrics collection for Selkie
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! Instruments are recorded through the global OpenTelemetry meter when the
//! `otel` feature is enabled, and compile to no-ops otherwise.

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

#[cfg(feature = "otel")]
static MESSAGES_DISPATCHED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("selkie")
        .u64_counter(METRIC_NAME_MESSAGES_DISPATCHED_TOTAL)
        .with_description("Total number of dispatched messages")
        .init()
});

#[cfg(feature = "otel")]
static SEGMENTS_COMMITTED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("selkie")
        .u64_counter(METRIC_NAME_SEGMENTS_COMMITTED_TOTAL)
        .with_description("Total number of committed segments")
        .init()
});

#[cfg(feature = "otel")]
static SEGMENTS_ROLLED_BACK_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("selkie")
        .u64_counter(METRIC_NAME_SEGMENTS_ROLLED_BACK_TOTAL)
        .with_description("Total number of rolled back segments")
        .init()
});

#[cfg(feature = "otel")]
static SEGMENT_DURATION_HISTOGRAM: Lazy<Histogram<f64>> = Lazy::new(|| {
    global::meter("selkie")
        .f64_histogram(METRIC_NAME_SEGMENT_DURATION_SECONDS)
        .with_description("Segment duration in seconds")
        .init()
});

/// Record a dispatched message
///
/// # Arguments
/// * `kind` - "inbound", "response" or "reject"
/// * `status` - "completed", "suspended", "buffered", "failed" or "dropped"
#[cfg(feature = "otel")]
pub fn record_dispatch(kind: &str, status: &str) {
    MESSAGES_DISPATCHED_COUNTER.add(
        1,
        &[
            KeyValue::new("kind", kind.to_string()),
            KeyValue::new("status", status.to_string()),
        ],
    );
}

/// Record a committed segment and how long it ran
#[cfg(feature = "otel")]
pub fn record_commit(handler: &str, duration_seconds: f64) {
    SEGMENTS_COMMITTED_COUNTER.add(1, &[]);
    SEGMENT_DURATION_HISTOGRAM.record(
        duration_seconds,
        &[KeyValue::new("handler", handler.to_string())],
    );
}

/// Record a rolled back segment
#[cfg(feature = "otel")]
pub fn record_rollback(handler: &str) {
    SEGMENTS_ROLLED_BACK_COUNTER.add(1, &[KeyValue::new("handler", handler.to_string())]);
}

#[cfg(not(feature = "otel"))]
pub fn record_dispatch(_kind: &str, _status: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_commit(_handler: &str, _duration_seconds: f64) {}

#[cfg(not(feature = "otel"))]
pub fn record_rollback(_handler: &str) {}
