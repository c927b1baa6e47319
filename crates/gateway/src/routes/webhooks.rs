//! Signed CI webhook intake.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use animus_services::auth::{CI_SIG_HEADER, CI_TS_HEADER};
use animus_services::scm;
use animus_types::error::{AuthError, CoreError};

use crate::{ApiError, AppState, RequestContext};

pub async fn ci(
    ctx: RequestContext,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let header = |name: &str| -> Result<String, ApiError> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .ok_or_else(|| {
                ctx.fail(CoreError::from(AuthError::Unauthorized(format!(
                    "missing {name} header"
                ))))
            })
    };
    let ts = header(CI_TS_HEADER)?;
    let sig = header(CI_SIG_HEADER)?;

    let attestation = scm::receive_attestation(&state.core, &ts, &sig, "POST", &body, Utc::now())
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "attestation_id": attestation.attestation_id,
            "image_digest": attestation.image_digest,
        })),
    ))
}
