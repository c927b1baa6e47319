#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # Animus Telemetry
//!
//! Observability infrastructure for the control plane: structured logging
//! initialization, a Prometheus metrics endpoint, and abstract sinks that
//! decouple instrumentation in the core from the metrics backend.

use tracing_subscriber::EnvFilter;

/// A lightweight HTTP server exposing `/metrics`, `/healthz` and `/readyz`.
pub mod http;
/// The concrete implementation of metrics sinks using the `prometheus` crate.
pub mod prometheus;
/// Abstract traits (`*MetricsSink`) that define the contract for metrics reporting.
pub mod sinks;

pub use sinks::{gateway_metrics, ingest_metrics, reconciler_metrics};

/// Installs the global `tracing` subscriber: JSON lines on stderr with UTC
/// RFC 3339 timestamps, filtered by `RUST_LOG` (default `info`). `log`
/// records from dependencies are bridged into `tracing` as well, so every
/// crate ends up on the same stream.
pub fn init_tracing() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .finish();
    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
