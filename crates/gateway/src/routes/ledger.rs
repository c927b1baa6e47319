//! Ledger read routes. Every response carries a checksum over the
//! returned entry slice so callers can detect transport tampering.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use animus_services::ledger::slice_checksum;

use crate::{ApiError, AppState, RequestContext};

pub async fn for_run(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .core
        .store
        .ledger_for_run(&run_id)
        .await
        .map_err(|e| ctx.fail(e.into()))?
        .ok_or_else(|| {
            ctx.fail(animus_types::error::CoreError::NotFound(format!(
                "ledger entry for run {run_id}"
            )))
        })?;
    let entries = vec![entry];
    let checksum = slice_checksum(&entries).map_err(|e| ctx.fail(e))?;
    Ok(Json(json!({"entries": entries, "checksum": checksum})))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn list(
    ctx: RequestContext,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state
        .core
        .store
        .list_ledger_entries(query.limit)
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    let checksum = slice_checksum(&entries).map_err(|e| ctx.fail(e))?;
    Ok(Json(json!({"entries": entries, "checksum": checksum})))
}
