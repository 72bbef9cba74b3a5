//! Prometheus metrics for the control-plane operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `controlplane_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `controlplane_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `controlplane_workqueue_retries_total` (counter): rate-limited requeues labeled by controller.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::error::Error;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "webconsole"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Controller name, e.g. "webconsole"
    pub controller: String,
    /// Error kind/category, e.g. "kube", "store", "unrecognized_state"
    pub kind: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking keys put back on the queue with backoff
pub static WORKQUEUE_RETRIES_TOTAL: Lazy<Family<ReconcileLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "controlplane_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );

    registry.register(
        "controlplane_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );

    registry.register(
        "controlplane_workqueue_retries_total",
        "Total number of rate-limited requeues",
        WORKQUEUE_RETRIES_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, err: &Error) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: error_kind(err).to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_workqueue_retry(controller: &str) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    WORKQUEUE_RETRIES_TOTAL.get_or_create(&labels).inc();
}

fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::KubeError(_) => "kube",
        Error::NotFound { .. } => "not_found",
        Error::ConfigError(_) => "config",
        Error::Template { .. } => "template",
        Error::SerializationError(_) | Error::YamlError(_) => "serialization",
        Error::UnrecognizedState { .. } => "unrecognized_state",
        Error::SecretConflict { .. } => "secret_conflict",
        Error::StoreError(_) => "store",
        Error::Aggregate(_) => "aggregate",
    }
}
