//! Run submission and lifecycle routes.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use animus_services::orchestrator::{self, SubmitOutcome, SubmitRunRequest};
use animus_types::error::ValidationError;

use crate::{ApiError, AppState, RequestContext};

/// Parses a run spec body by hand so malformed JSON surfaces the stable
/// `invalid_json` code instead of the framework default.
fn parse_spec(ctx: &RequestContext, body: &[u8]) -> Result<SubmitRunRequest, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ctx.fail(ValidationError::InvalidJson(e.to_string()).into()))
}

pub async fn submit(
    ctx: RequestContext,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request = parse_spec(&ctx, &body)?;
    match orchestrator::submit(&state.core, &ctx.actor, request).await {
        Ok(SubmitOutcome::Started { run, status }) => Ok((
            StatusCode::CREATED,
            Json(json!({
                "run": run,
                "status": status,
                "request_id": ctx.request_id,
            })),
        )),
        Ok(SubmitOutcome::ApprovalRequired {
            run,
            approvals,
            decisions,
        }) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "run": run,
                "status": "pending",
                "approvals": approvals,
                "decisions": decisions,
                "request_id": ctx.request_id,
            })),
        )),
        Err(e) => Err(ctx.fail(e)),
    }
}

pub async fn dry_run(
    ctx: RequestContext,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request = parse_spec(&ctx, &body)?;
    let response = orchestrator::dry_run(&state.core, &ctx.actor, request)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list(
    ctx: RequestContext,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let runs = state
        .core
        .store
        .list_runs(query.limit)
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    Ok(Json(json!({"runs": runs})))
}

pub async fn get(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state
        .core
        .store
        .get_run(&run_id)
        .await
        .map_err(|e| ctx.fail(e.into()))?
        .ok_or_else(|| {
            ctx.fail(animus_types::error::CoreError::NotFound(format!("run {run_id}")))
        })?;
    let status = state
        .core
        .store
        .current_status(&run_id)
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    Ok(Json(json!({"run": run, "status": status})))
}

pub async fn state_events(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .core
        .store
        .state_events(&run_id)
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    Ok(Json(json!({"events": events})))
}

#[derive(Deserialize, Default)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let status = orchestrator::cancel(&state.core, &ctx.actor, &run_id, reason)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok(Json(json!({"run_id": run_id, "status": status})))
}
