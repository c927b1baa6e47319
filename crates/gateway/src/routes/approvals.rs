//! Approval listing and resolution routes.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use animus_services::approvals::{self, ResolveAction};

use crate::{ApiError, AppState, RequestContext};

pub async fn pending(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let approvals = state
        .core
        .store
        .pending_approvals(100)
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    Ok(Json(json!({"approvals": approvals})))
}

#[derive(Deserialize, Default)]
pub struct ResolveBody {
    #[serde(default)]
    pub reason: Option<String>,
}

async fn resolve(
    ctx: RequestContext,
    state: AppState,
    approval_id: String,
    action: ResolveAction,
    reason: Option<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = approvals::resolve(&state.core, &ctx.actor, &approval_id, action, reason)
        .await
        .map_err(|e| ctx.fail(e))?;
    if let Some(conflict) = outcome.conflict {
        return Ok((
            axum::http::StatusCode::CONFLICT,
            Json(json!({
                "error": conflict,
                "request_id": ctx.request_id,
                "approval": outcome.approval,
            })),
        ));
    }
    Ok((
        axum::http::StatusCode::OK,
        Json(json!({
            "approval": outcome.approval,
            "run_status": outcome.run_status,
        })),
    ))
}

pub async fn approve(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
    body: Option<Json<ResolveBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    resolve(ctx, state, approval_id, ResolveAction::Approve, reason).await
}

pub async fn deny(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
    body: Option<Json<ResolveBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    resolve(ctx, state, approval_id, ResolveAction::Deny, reason).await
}
