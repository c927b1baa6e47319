//! Policy listing and administration routes.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use animus_services::policy::{self, PolicyUpsertRequest};

use crate::{ApiError, AppState, RequestContext};

pub async fn list(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let versions = state
        .core
        .store
        .list_policy_versions()
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    Ok(Json(json!({"policy_versions": versions})))
}

pub async fn upsert(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
    Json(request): Json<PolicyUpsertRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let version = policy::upsert_version(&state.core, &ctx.actor, &policy_id, request)
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok((axum::http::StatusCode::CREATED, Json(version)))
}
