//! Prometheus metrics for the correlation layer
//!
//! Counters are process-wide and shared by every connection:
//! - Operations by kind and outcome
//! - Stale completions and timer firings that were discarded
//! - Timeouts and admission rejections
//! - Pending async operations and live pooled records

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Once;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kvbridge_operations_total", "Operations resolved, by kind and outcome"),
        &["kind", "outcome"]
    ).unwrap();

    pub static ref STALE_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kvbridge_stale_events_total", "Callbacks discarded because their ticket was no longer current"),
        &["source"]
    ).unwrap();

    pub static ref TIMEOUTS_TOTAL: IntCounter = IntCounter::new(
        "kvbridge_timeouts_total",
        "Deadlines that resolved a call"
    ).unwrap();

    pub static ref ADMISSION_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kvbridge_admission_rejections_total", "Async submissions rejected before reaching the engine"),
        &["reason"]
    ).unwrap();

    pub static ref CONNECTION_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kvbridge_connection_errors_total", "Connection-level errors reported by the engine"),
        &["status"]
    ).unwrap();

    pub static ref ASYNC_PENDING: IntGauge = IntGauge::new(
        "kvbridge_async_pending",
        "Async operations submitted and not yet completed"
    ).unwrap();

    pub static ref POOL_LIVE_RECORDS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("kvbridge_pool_live_records", "Live records per slab pool"),
        &["pool"]
    ).unwrap();
}

static INIT: Once = Once::new();

/// Register every metric with the global registry (idempotent)
pub fn init_metrics() {
    INIT.call_once(|| {
        info!("Initializing Prometheus metrics");
        METRICS_REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone())).ok();
        METRICS_REGISTRY.register(Box::new(STALE_EVENTS_TOTAL.clone())).ok();
        METRICS_REGISTRY.register(Box::new(TIMEOUTS_TOTAL.clone())).ok();
        METRICS_REGISTRY.register(Box::new(ADMISSION_REJECTIONS_TOTAL.clone())).ok();
        METRICS_REGISTRY.register(Box::new(CONNECTION_ERRORS_TOTAL.clone())).ok();
        METRICS_REGISTRY.register(Box::new(ASYNC_PENDING.clone())).ok();
        METRICS_REGISTRY.register(Box::new(POOL_LIVE_RECORDS.clone())).ok();
    });
}

pub fn record_operation(kind: &str, outcome: &str) {
    OPERATIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn record_stale(source: &str) {
    STALE_EVENTS_TOTAL.with_label_values(&[source]).inc();
}

pub fn record_rejection(reason: &str) {
    ADMISSION_REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_connection_error(status: &str) {
    CONNECTION_ERRORS_TOTAL.with_label_values(&[status]).inc();
}

pub fn update_pool_live(pool: &str, live: usize) {
    POOL_LIVE_RECORDS.with_label_values(&[pool]).set(live as i64);
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    init_metrics();
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}
