//! A concrete implementation of the metrics sinks using the Prometheus crate.

use crate::sinks::*;
use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_histogram_vec, register_int_counter_vec, HistogramVec,
    IntCounterVec,
};

// --- Metric Statics ---
// OnceCell holds the collectors; `install` initializes them exactly once.

static GATEWAY_REQUESTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static GATEWAY_REQUEST_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static RECONCILER_TICK_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static RECONCILER_TRANSITIONS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static RECONCILER_INSPECT_ERRORS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static INGEST_METRIC_SAMPLES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static INGEST_RUN_EVENTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

/// Registers every collector and installs the sink as the process-global
/// metrics backend. Calling it twice is a no-op.
pub fn install() {
    let _ = GATEWAY_REQUESTS_TOTAL.set(
        register_int_counter_vec!(
            "animus_gateway_requests_total",
            "Total HTTP gateway requests",
            &["route", "status"]
        )
        .expect("register_int_counter_vec"),
    );
    let _ = GATEWAY_REQUEST_DURATION_SECONDS.set(
        register_histogram_vec!(
            "animus_gateway_request_duration_seconds",
            "Latency of HTTP gateway requests (seconds)",
            &["route"],
            exponential_buckets(0.001, 2.0, 15).expect("buckets")
        )
        .expect("register_histogram_vec"),
    );
    let _ = RECONCILER_TICK_DURATION_SECONDS.set(
        register_histogram_vec!(
            "animus_reconciler_tick_duration_seconds",
            "Duration of one reconciler tick (seconds)",
            &["syncer"],
            exponential_buckets(0.001, 2.0, 15).expect("buckets")
        )
        .expect("register_histogram_vec"),
    );
    let _ = RECONCILER_TRANSITIONS_TOTAL.set(
        register_int_counter_vec!(
            "animus_reconciler_transitions_total",
            "State transitions projected from executor observations",
            &["status"]
        )
        .expect("register_int_counter_vec"),
    );
    let _ = RECONCILER_INSPECT_ERRORS_TOTAL.set(
        register_int_counter_vec!(
            "animus_reconciler_inspect_errors_total",
            "Executor inspect errors swallowed for retry",
            &["syncer"]
        )
        .expect("register_int_counter_vec"),
    );
    let _ = INGEST_METRIC_SAMPLES_TOTAL.set(
        register_int_counter_vec!(
            "animus_ingest_metric_samples_total",
            "Metric samples seen by the telemetry ingestor",
            &["outcome"]
        )
        .expect("register_int_counter_vec"),
    );
    let _ = INGEST_RUN_EVENTS_TOTAL.set(
        register_int_counter_vec!(
            "animus_ingest_run_events_total",
            "Run log events appended by the telemetry ingestor",
            &["level"]
        )
        .expect("register_int_counter_vec"),
    );

    let _ = crate::sinks::SINK.set(&PrometheusSink);
}

/// Helper macro to reduce boilerplate for getting a metric from OnceCell.
/// Panics if `install()` has not been called, which is intentional as it
/// indicates a critical application setup error.
macro_rules! get_metric {
    ($metric:ident) => {
        $metric
            .get()
            .expect("Prometheus sink not initialized. Call telemetry::prometheus::install() first.")
    };
}

impl GatewayMetricsSink for PrometheusSink {
    fn observe_request_duration(&self, route: &str, duration_secs: f64) {
        get_metric!(GATEWAY_REQUEST_DURATION_SECONDS)
            .with_label_values(&[route])
            .observe(duration_secs);
    }
    fn inc_requests_total(&self, route: &str, status_code: u16) {
        get_metric!(GATEWAY_REQUESTS_TOTAL)
            .with_label_values(&[route, &status_code.to_string()])
            .inc();
    }
}

impl ReconcilerMetricsSink for PrometheusSink {
    fn observe_tick_duration(&self, syncer: &str, duration_secs: f64) {
        get_metric!(RECONCILER_TICK_DURATION_SECONDS)
            .with_label_values(&[syncer])
            .observe(duration_secs);
    }
    fn inc_transitions(&self, status: &str) {
        get_metric!(RECONCILER_TRANSITIONS_TOTAL)
            .with_label_values(&[status])
            .inc();
    }
    fn inc_inspect_errors(&self, syncer: &str) {
        get_metric!(RECONCILER_INSPECT_ERRORS_TOTAL)
            .with_label_values(&[syncer])
            .inc();
    }
}

impl IngestMetricsSink for PrometheusSink {
    fn add_metric_samples(&self, received: u64, inserted: u64) {
        get_metric!(INGEST_METRIC_SAMPLES_TOTAL)
            .with_label_values(&["received"])
            .inc_by(received);
        get_metric!(INGEST_METRIC_SAMPLES_TOTAL)
            .with_label_values(&["inserted"])
            .inc_by(inserted);
    }
    fn inc_run_events(&self, count: u64) {
        get_metric!(INGEST_RUN_EVENTS_TOTAL)
            .with_label_values(&["all"])
            .inc_by(count);
    }
}
