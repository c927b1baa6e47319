use axum::{
    body::Bytes,
    http::{header::CONTENT_TYPE, HeaderName},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use tokio::sync::watch;

async fn metrics_handler() -> ([(HeaderName, String); 1], Bytes) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::with_capacity(1 << 16);
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        tracing::error!(error=%e, "Failed to encode prometheus metrics");
    }
    (
        [(CONTENT_TYPE, encoder.format_type().to_string())],
        buf.into(),
    )
}

async fn healthz_handler() -> &'static str {
    "OK"
}
async fn readyz_handler() -> &'static str {
    "OK"
}

/// Serves `/metrics`, `/healthz` and `/readyz` until the shutdown signal
/// flips.
pub async fn run_server(addr: SocketAddr, mut shutdown: watch::Receiver<bool>) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(target = "telemetry", error = %e, "Failed to bind telemetry http server");
            return;
        }
    };
    match listener.local_addr() {
        Ok(addr) => tracing::info!(target = "telemetry", addr = %addr, "listening"),
        Err(_) => tracing::info!(target = "telemetry", "listening"),
    }

    let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
        tracing::info!(target = "telemetry", "shutting down gracefully");
    });

    if let Err(e) = graceful.await {
        tracing::error!(target="telemetry", error=%e, "server error");
    }
}
