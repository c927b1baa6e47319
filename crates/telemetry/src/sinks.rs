//! Defines abstract traits for metrics reporting, decoupling core logic from the backend.

use once_cell::sync::OnceCell;

// --- Static Sink Access ---

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the global `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns a static reference to the configured gateway metrics sink.
/// If no sink has been initialized, it returns a no-op sink.
pub fn gateway_metrics() -> &'static dyn GatewayMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured reconciler metrics sink.
pub fn reconciler_metrics() -> &'static dyn ReconcilerMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured ingest metrics sink.
pub fn ingest_metrics() -> &'static dyn IngestMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

// --- Trait Definitions ---

/// A sink for metrics related to the HTTP gateway.
pub trait GatewayMetricsSink: Send + Sync + std::fmt::Debug {
    /// Observes the latency of a request, labeled by route.
    fn observe_request_duration(&self, route: &str, duration_secs: f64);
    /// Increments a counter for total requests, labeled by route and status code.
    fn inc_requests_total(&self, route: &str, status_code: u16);
}
impl GatewayMetricsSink for NopSink {
    fn observe_request_duration(&self, _route: &str, _duration_secs: f64) {}
    fn inc_requests_total(&self, _route: &str, _status_code: u16) {}
}

/// A sink for metrics from the background reconcilers.
pub trait ReconcilerMetricsSink: Send + Sync + std::fmt::Debug {
    /// Observes the duration of one reconcile tick, labeled by syncer.
    fn observe_tick_duration(&self, syncer: &str, duration_secs: f64);
    /// Increments the count of state transitions projected from observations.
    fn inc_transitions(&self, status: &str);
    /// Increments the count of inspect errors swallowed for retry.
    fn inc_inspect_errors(&self, syncer: &str);
}
impl ReconcilerMetricsSink for NopSink {
    fn observe_tick_duration(&self, _syncer: &str, _duration_secs: f64) {}
    fn inc_transitions(&self, _status: &str) {}
    fn inc_inspect_errors(&self, _syncer: &str) {}
}

/// A sink for telemetry-ingestion metrics.
pub trait IngestMetricsSink: Send + Sync + std::fmt::Debug {
    /// Adds to the counters of received and newly inserted metric samples.
    fn add_metric_samples(&self, received: u64, inserted: u64);
    /// Increments the count of run log events appended.
    fn inc_run_events(&self, count: u64);
}
impl IngestMetricsSink for NopSink {
    fn add_metric_samples(&self, _received: u64, _inserted: u64) {}
    fn inc_run_events(&self, _count: u64) {}
}

/// A unified sink implementing every domain-specific trait, so a metrics
/// backend like Prometheus has a single point of implementation.
pub trait MetricsSink: GatewayMetricsSink + ReconcilerMetricsSink + IngestMetricsSink {}

// Blanket implementation to allow any type that implements all sub-traits
// to be used as a `MetricsSink`.
impl<T> MetricsSink for T where T: GatewayMetricsSink + ReconcilerMetricsSink + IngestMetricsSink {}
