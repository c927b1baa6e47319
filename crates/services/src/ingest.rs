//! The telemetry ingestor: metrics and log events from executing
//! containers, authenticated by the run-scoped token.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use animus_telemetry::ingest_metrics;
use animus_types::codec;
use animus_types::error::{CoreError, IngestError, UpstreamError, ValidationError};
use animus_types::ids;
use animus_types::run::{Artifact, ArtifactKind, EventLevel, MetricSample, RunEvent};

use crate::audit;
use crate::auth;
use crate::Core;

/// One metrics ingest request: every value for one step.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsRequest {
    pub step: u64,
    pub metrics: BTreeMap<String, Value>,
}

/// Partial-success report: `inserted` counts only rows that did not exist.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsResponse {
    pub received: usize,
    pub inserted: usize,
}

/// One log line in an events ingest request.
#[derive(Debug, Clone, Deserialize)]
pub struct EventLine {
    pub level: EventLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EventsResponse {
    pub appended: usize,
    pub last_event_id: u64,
}

fn authorize(core: &Core, run_id: &str, token: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
    let secret = core.config.run_token_secret()?;
    auth::verify_run_token(secret, token, run_id, now)?;
    Ok(())
}

/// Ingests one step's metrics. Values must be finite numbers; any
/// non-numeric value fails the whole request before persistence. Duplicate
/// `(run_id, name, step)` rows are skipped and reported through the
/// `inserted` count.
pub async fn ingest_metrics_for_run(
    core: &Core,
    run_id: &str,
    token: &str,
    request: MetricsRequest,
    now: DateTime<Utc>,
) -> Result<MetricsResponse, CoreError> {
    authorize(core, run_id, token, now)?;
    if core.store.get_run(run_id).await?.is_none() {
        return Err(CoreError::NotFound(format!("run {run_id}")));
    }

    let mut validated: Vec<(String, f64)> = Vec::with_capacity(request.metrics.len());
    for (name, value) in &request.metrics {
        let number = value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| IngestError::InvalidMetricValue(name.clone()))?;
        validated.push((name.clone(), number));
    }

    let received = validated.len();
    let mut inserted = 0usize;
    let mut tx = core.store.begin().await?;
    for (name, value) in validated {
        let sample = MetricSample {
            sample_id: ids::new_id("ms"),
            run_id: run_id.to_string(),
            step: request.step,
            name,
            value,
            metadata: None,
            created_at: now,
        };
        if tx.insert_metric_sample(sample).await? {
            inserted += 1;
        }
    }
    tx.insert_audit_event(audit::audit_event(
        "run-token",
        "experiment_run.metrics_ingested",
        "experiment_run",
        run_id,
        serde_json::json!({"step": request.step, "received": received, "inserted": inserted}),
        now,
    )?)
    .await?;
    tx.commit().await?;

    ingest_metrics().add_metric_samples(received as u64, inserted as u64);
    Ok(MetricsResponse { received, inserted })
}

/// Appends log lines to the run's monotonically numbered event log.
pub async fn ingest_events_for_run(
    core: &Core,
    run_id: &str,
    token: &str,
    lines: Vec<EventLine>,
    now: DateTime<Utc>,
) -> Result<EventsResponse, CoreError> {
    authorize(core, run_id, token, now)?;
    if core.store.get_run(run_id).await?.is_none() {
        return Err(CoreError::NotFound(format!("run {run_id}")));
    }

    let mut tx = core.store.begin().await?;
    let mut last: Option<RunEvent> = None;
    let appended = lines.len();
    for line in lines {
        last = Some(
            tx.append_run_event(run_id, line.level, &line.message, now)
                .await?,
        );
    }
    tx.insert_audit_event(audit::audit_event(
        "run-token",
        "experiment_run.events_ingested",
        "experiment_run",
        run_id,
        serde_json::json!({"appended": appended}),
        now,
    )?)
    .await?;
    tx.commit().await?;

    ingest_metrics().inc_run_events(appended as u64);
    Ok(EventsResponse {
        appended,
        last_event_id: last.map(|e| e.event_id).unwrap_or(0),
    })
}

/// An artifact registration. Either the content is inlined (base64) and
/// uploaded by the control plane, or the container uploaded it directly
/// and supplies the object key plus its hash and size.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactRequest {
    pub name: String,
    pub kind: ArtifactKind,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_base64: Option<String>,
    #[serde(default)]
    pub object_key: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Registers an artifact against a run, uploading inlined content first.
pub async fn register_artifact(
    core: &Core,
    run_id: &str,
    token: &str,
    request: ArtifactRequest,
    now: DateTime<Utc>,
) -> Result<Artifact, CoreError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    authorize(core, run_id, token, now)?;
    let run = core
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("run {run_id}")))?;
    if request.name.trim().is_empty() {
        return Err(ValidationError::InvalidSpec("artifact name is required".into()).into());
    }

    let content_type = request
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let (object_key, sha256, size_bytes) = match request.content_base64 {
        Some(encoded) => {
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| ValidationError::InvalidSpec(format!("content_base64: {e}")))?;
            let key = request
                .object_key
                .unwrap_or_else(|| format!("{}/artifacts/{}", run.artifacts_prefix, request.name));
            let sha256 = codec::sha256_hex(&bytes);
            let size_bytes = bytes.len() as u64;
            tokio::time::timeout(
                crate::evidence::ARTIFACT_UPLOAD_TIMEOUT,
                core.objects
                    .put_object(&key, bytes::Bytes::from(bytes), &content_type),
            )
            .await
            .map_err(|_| UpstreamError::ObjectStore("artifact upload timed out".into()))?
            .map_err(|e| UpstreamError::ObjectStore(e.to_string()))?;
            (key, sha256, size_bytes)
        }
        None => {
            let (Some(key), Some(sha256), Some(size_bytes)) =
                (request.object_key, request.sha256, request.size_bytes)
            else {
                return Err(ValidationError::InvalidSpec(
                    "artifact without content requires object_key, sha256 and size_bytes".into(),
                )
                .into());
            };
            (key, sha256, size_bytes)
        }
    };

    let artifact = Artifact {
        artifact_id: ids::new_id("art"),
        run_id: run_id.to_string(),
        name: request.name,
        object_key,
        sha256,
        size_bytes,
        content_type,
        kind: request.kind,
        created_at: now,
    };

    let mut tx = core.store.begin().await?;
    tx.insert_artifact(artifact.clone()).await?;
    tx.insert_audit_event(audit::audit_event(
        "run-token",
        "experiment_run.artifact_registered",
        "experiment_run",
        run_id,
        serde_json::json!({
            "artifact_id": &artifact.artifact_id,
            "name": &artifact.name,
            "kind": artifact.kind,
            "sha256": &artifact.sha256,
        }),
        now,
    )?)
    .await?;
    tx.commit().await?;
    Ok(artifact)
}
