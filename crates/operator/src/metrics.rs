use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry, Encoder, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref RECONCILIATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "alertsync_reconciliations_total",
            "Total number of reconciliations by resource kind and outcome."
        ),
        &["kind", "outcome"]
    )
    .unwrap();
    pub static ref STATUS_PATCH_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "alertsync_status_patch_failures_total",
            "Total number of failed status patches by resource kind."
        ),
        &["kind"]
    )
    .unwrap();
}

/// Register the collectors with the registry. Safe to call more than once.
pub fn register_metrics() {
    // AlreadyReg on a second call is expected.
    let _ = REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STATUS_PATCH_FAILURES_TOTAL.clone()));
}

pub fn record_reconciliation(kind: &str, outcome: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn record_status_patch_failure(kind: &str) {
    STATUS_PATCH_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

/// Text exposition of every registered metric.
pub fn gather_metrics() -> String {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
