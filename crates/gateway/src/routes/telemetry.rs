//! Telemetry ingest and read routes. Ingest authenticates with the
//! run-scoped token, reads with the regular API identity.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;

use animus_services::ingest::{self, ArtifactRequest, EventLine, MetricsRequest};

use crate::{ApiError, AppState, RequestContext};

pub async fn ingest_metrics(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<MetricsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = ctx.run_token()?.to_string();
    let response =
        ingest::ingest_metrics_for_run(&state.core, &run_id, &token, request, Utc::now())
            .await
            .map_err(|e| ctx.fail(e))?;
    Ok(Json(response))
}

pub async fn list_metrics(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let samples = state
        .core
        .store
        .metrics_for_run(&run_id)
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    Ok(Json(json!({"samples": samples})))
}

#[derive(Deserialize)]
pub struct EventsBody {
    pub events: Vec<EventLine>,
}

pub async fn ingest_events(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<EventsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let token = ctx.run_token()?.to_string();
    let response =
        ingest::ingest_events_for_run(&state.core, &run_id, &token, body.events, Utc::now())
            .await
            .map_err(|e| ctx.fail(e))?;
    Ok(Json(response))
}

#[derive(Deserialize, Default)]
pub struct EventsQuery {
    #[serde(default)]
    pub after: Option<u64>,
}

pub async fn list_events(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .core
        .store
        .run_events(&run_id, query.after)
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    Ok(Json(json!({"events": events})))
}

/// Tails a run's event log over SSE. Client disconnect drops the stream;
/// nothing server-side depends on it staying open.
pub async fn stream_events(
    _ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = futures_util::stream::unfold(
        (state, run_id, query.after.unwrap_or(0)),
        |(state, run_id, mut cursor)| async move {
            loop {
                match state.core.store.run_events(&run_id, Some(cursor)).await {
                    Ok(events) if !events.is_empty() => {
                        cursor = events.last().map(|e| e.event_id).unwrap_or(cursor);
                        let payload = serde_json::to_string(&events).unwrap_or_default();
                        return Some((
                            Ok(Event::default().event("run_events").data(payload)),
                            (state, run_id, cursor),
                        ));
                    }
                    Ok(_) => {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                    Err(e) => {
                        tracing::debug!(target: "gateway", error = %e, "event stream poll failed");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        },
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn register_artifact(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<ArtifactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = ctx.run_token()?.to_string();
    let artifact = ingest::register_artifact(&state.core, &run_id, &token, request, Utc::now())
        .await
        .map_err(|e| ctx.fail(e))?;
    Ok((axum::http::StatusCode::CREATED, Json(artifact)))
}

pub async fn list_artifacts(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let artifacts = state
        .core
        .store
        .artifacts_for_run(&run_id)
        .await
        .map_err(|e| ctx.fail(e.into()))?;
    Ok(Json(json!({"artifacts": artifacts})))
}
