#![forbid(unsafe_code)]

//! The HTTP REST surface of the Animus control plane.
//!
//! Thin adapters over the core operations: every handler authenticates,
//! deserializes, calls into `animus-services` and maps the result onto the
//! stable error envelope `{"error": "<code>", "request_id": "<id>"}`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequestParts, MatchedPath, Request};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use animus_api::identity::Actor;
use animus_services::Core;
use animus_telemetry::gateway_metrics;
use animus_types::error::{CoreError, ErrorCode};

mod routes;

/// Request body cap: run params and policy specs are small documents.
const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
}

/// Maps stable error codes onto HTTP statuses.
fn status_for(code: &str) -> StatusCode {
    match code {
        "invalid_json" | "invalid_spec" | "invalid_params" | "invalid_status"
        | "invalid_metric_value" | "image_ref_required" | "image_ref_digest_required"
        | "image_ref_not_found" | "git_commit_required" | "quality_gate_failed"
        | "serialization_error" => StatusCode::BAD_REQUEST,
        "unauthorized" => StatusCode::UNAUTHORIZED,
        "policy_denied" | "approval_requires_admin" | "approval_requires_second_reviewer" => {
            StatusCode::FORBIDDEN
        }
        "not_found" | "plan_not_found" => StatusCode::NOT_FOUND,
        "invalid_transition" | "conflict" | "approval_not_pending" | "approval_denied"
        | "execution_already_exists" | "git_repo_conflict" | "git_commit_conflict" => {
            StatusCode::CONFLICT
        }
        "object_store_error" | "training_submit_failed" | "image_ref_resolution_failed"
        | "lineage_write_failed" | "audit_failed" => StatusCode::BAD_GATEWAY,
        "training_executor_disabled" => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// One request's identity and correlation id, extracted before any handler
/// logic runs.
#[derive(Clone)]
pub struct RequestContext {
    pub actor: Actor,
    pub request_id: String,
    pub bearer: Option<String>,
}

impl RequestContext {
    /// Wraps a core failure into the stable error envelope.
    pub fn fail(&self, err: CoreError) -> ApiError {
        let code = err.code();
        if status_for(code) == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(target: "gateway", request_id = %self.request_id, error = %err, "request failed");
        } else {
            tracing::debug!(target: "gateway", request_id = %self.request_id, code, "request rejected");
        }
        ApiError {
            code,
            message: err.to_string(),
            request_id: self.request_id.clone(),
        }
    }

    /// The bearer token, for run-token authenticated ingest routes.
    pub fn run_token(&self) -> Result<&str, ApiError> {
        self.bearer.as_deref().ok_or_else(|| ApiError {
            code: "unauthorized",
            message: "missing run token".into(),
            request_id: self.request_id.clone(),
        })
    }
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let bearer = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.to_string());

        // Ingest routes authenticate with the run token; everything else
        // with the deployment API token, when one is configured.
        let is_run_token = bearer
            .as_deref()
            .map(|b| b.starts_with(animus_services::auth::RUN_TOKEN_PREFIX))
            .unwrap_or(false);
        if let Some(expected) = &state.core.config.api_token {
            if !is_run_token && bearer.as_deref() != Some(expected.as_str()) {
                return Err(ApiError {
                    code: "unauthorized",
                    message: "missing or invalid API token".into(),
                    request_id,
                });
            }
        }

        // Identity supplied by the authenticating proxy.
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        let actor = Actor {
            subject: header("x-animus-subject").unwrap_or_else(|| "anonymous".to_string()),
            email: header("x-animus-email"),
            roles: header("x-animus-roles")
                .map(|roles| {
                    roles
                        .split(',')
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        Ok(Self {
            actor,
            request_id,
            bearer,
        })
    }
}

/// The stable error envelope.
#[derive(Debug)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.code);
        let body = serde_json::json!({
            "error": self.code,
            "request_id": self.request_id,
            "message": self.message,
        });
        (status, Json(body)).into_response()
    }
}

async fn metrics_middleware(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();
    let response = next.run(request).await;
    gateway_metrics().observe_request_duration(&route, started.elapsed().as_secs_f64());
    gateway_metrics().inc_requests_total(&route, response.status().as_u16());
    response
}

async fn healthz() -> &'static str {
    "OK"
}

/// Builds the full API router.
pub fn router(core: Arc<Core>) -> Router {
    let state = AppState { core };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/runs", post(routes::runs::submit).get(routes::runs::list))
        .route("/api/v1/runs/dry-run", post(routes::runs::dry_run))
        .route("/api/v1/runs/:run_id", get(routes::runs::get))
        .route("/api/v1/runs/:run_id/state-events", get(routes::runs::state_events))
        .route("/api/v1/runs/:run_id/cancel", post(routes::runs::cancel))
        .route(
            "/api/v1/runs/:run_id/metrics",
            post(routes::telemetry::ingest_metrics).get(routes::telemetry::list_metrics),
        )
        .route(
            "/api/v1/runs/:run_id/events",
            post(routes::telemetry::ingest_events).get(routes::telemetry::list_events),
        )
        .route(
            "/api/v1/runs/:run_id/events/stream",
            get(routes::telemetry::stream_events),
        )
        .route(
            "/api/v1/runs/:run_id/artifacts",
            post(routes::telemetry::register_artifact).get(routes::telemetry::list_artifacts),
        )
        .route(
            "/api/v1/runs/:run_id/evidence",
            post(routes::evidence::build).get(routes::evidence::list),
        )
        .route("/api/v1/runs/:run_id/ledger", get(routes::ledger::for_run))
        .route("/api/v1/ledger", get(routes::ledger::list))
        .route("/api/v1/policies", get(routes::policies::list))
        .route("/api/v1/policies/:policy_id", put(routes::policies::upsert))
        .route("/api/v1/approvals", get(routes::approvals::pending))
        .route(
            "/api/v1/approvals/:approval_id/approve",
            post(routes::approvals::approve),
        )
        .route(
            "/api/v1/approvals/:approval_id/deny",
            post(routes::approvals::deny),
        )
        .route("/api/v1/webhooks/ci", post(routes::webhooks::ci))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Serves the API until the shutdown signal flips.
pub async fn serve(
    core: Arc<Core>,
    addr: std::net::SocketAddr,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = router(core);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(target: "gateway", addr = %addr, "listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            tracing::info!(target: "gateway", "shutting down gracefully");
        })
        .await
}
