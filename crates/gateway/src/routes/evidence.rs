//! Evidence bundle routes.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use animus_services::evidence;

use crate::{ApiError, AppState, RequestContext};

pub async fn build(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle = evidence::build_bundle(&state.core, &ctx.actor, &run_id)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok((axum::http::StatusCode::CREATED, Json(bundle)))
}

pub async fn list(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bundles = state
        .core
        .store
        .evidence_bundles_for_run(&run_id)
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    Ok(Json(json!({"bundles": bundles})))
}
