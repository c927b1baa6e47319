//! CI/SCM webhook intake: image digest attestations.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use animus_types::codec;
use animus_types::digest;
use animus_types::error::{CoreError, ValidationError};
use animus_types::ids;
use animus_types::scm::ImageAttestation;

use crate::audit;
use crate::auth;
use crate::Core;

/// The body a CI pipeline posts after pushing an image.
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationPayload {
    pub image_digest: String,
    pub git_repo: String,
    pub git_commit: String,
    #[serde(default)]
    pub git_ref: Option<String>,
    /// Free-form governance snapshot from the CI run.
    #[serde(default)]
    pub governance: Value,
}

/// Verifies the webhook signature and records the attestation.
pub async fn receive_attestation(
    core: &Core,
    ts: &str,
    sig: &str,
    method: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<ImageAttestation, CoreError> {
    let secret = core.config.ci_webhook_secret()?;
    auth::verify_webhook(secret, ts, sig, method, body, now, core.config.ci_webhook_max_skew)?;

    let payload: AttestationPayload = serde_json::from_slice(body)
        .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    let image_digest = digest::normalize_digest(&payload.image_digest).ok_or_else(|| {
        ValidationError::InvalidSpec(format!(
            "attestation digest '{}' is not a sha256 digest",
            payload.image_digest
        ))
    })?;
    if payload.git_repo.is_empty() || payload.git_commit.is_empty() {
        return Err(
            ValidationError::InvalidSpec("attestation requires git repo and commit".into()).into(),
        );
    }

    let mut attestation = ImageAttestation {
        attestation_id: ids::new_id("att"),
        image_digest: image_digest.clone(),
        git_repo: payload.git_repo,
        git_commit: payload.git_commit,
        git_ref: payload.git_ref,
        payload: payload.governance,
        created_at: now,
        integrity_sha256: String::new(),
    };
    attestation.integrity_sha256 = codec::record_integrity(&attestation)?;

    let mut tx = core.store.begin().await?;
    tx.insert_attestation(attestation.clone()).await?;
    tx.insert_audit_event(audit::audit_event(
        "ci",
        "scm.attestation_received",
        "image",
        &image_digest,
        serde_json::json!({
            "attestation_id": &attestation.attestation_id,
            "git_repo": &attestation.git_repo,
            "git_commit": &attestation.git_commit,
        }),
        now,
    )?)
    .await?;
    tx.commit().await?;

    tracing::info!(
        target: "scm",
        digest = %image_digest,
        repo = %attestation.git_repo,
        "image attestation recorded"
    );
    Ok(attestation)
}
