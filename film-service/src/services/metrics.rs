//! Metrics collection and Prometheus export.
//!
//! Initializes the metrics exporter and provides the /metrics endpoint handler.

use crate::models::ResourceKind;
use crate::services::storage::StreamOutcome;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Panics if called more than once.
pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }

    describe_counter!(
        "resource_requests_total",
        "Resource requests by kind and pipeline result"
    );
    describe_counter!(
        "resource_stream_outcomes_total",
        "Started transfers by kind and how they ended"
    );
    describe_counter!("resource_bytes_sent_total", "Body bytes written by kind");
}

/// Get the current metrics in Prometheus text format.
///
/// Returns a string suitable for the /metrics HTTP endpoint.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

pub fn record_request(kind: ResourceKind, result: &'static str) {
    counter!(
        "resource_requests_total",
        "kind" => kind.as_str(),
        "result" => result
    )
    .increment(1);
}

pub fn record_stream_outcome(kind: ResourceKind, outcome: &StreamOutcome) {
    counter!(
        "resource_stream_outcomes_total",
        "kind" => kind.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    counter!("resource_bytes_sent_total", "kind" => kind.as_str()).increment(outcome.bytes_sent());
}
