//! Prometheus metrics for the propagator.
//!
//! This module provides:
//! - reconciliation counts and latency by result
//! - target mutation counts by operation and result
//! - work queue depth

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const RECONCILIATIONS_TOTAL: &str = "propagator_reconciliations_total";
    pub const RECONCILE_DURATION_SECONDS: &str = "propagator_reconcile_duration_seconds";
    pub const TARGET_OPERATIONS_TOTAL: &str = "propagator_target_operations_total";
    pub const WORK_QUEUE_DEPTH: &str = "propagator_work_queue_depth";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Record a finished reconciliation. `result` is `success` or an error reason.
pub fn record_reconciliation(result: &str, duration: Duration) {
    counter!(names::RECONCILIATIONS_TOTAL, "result" => result.to_string()).increment(1);
    histogram!(names::RECONCILE_DURATION_SECONDS, "result" => result.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_target_operation(operation: &str, result: &str) {
    counter!(
        names::TARGET_OPERATIONS_TOTAL,
        "operation" => operation.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!(names::WORK_QUEUE_DEPTH).set(depth as f64);
}
