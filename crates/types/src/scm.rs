//! CI/SCM image attestations received over the signed webhook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;

/// A CI-attested binding between an image digest and the git coordinates it
/// was built from. Submission reconciles run metadata against the latest
/// attestation for the resolved digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageAttestation {
    pub attestation_id: String,
    pub image_digest: String,
    pub git_repo: String,
    pub git_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    /// The raw governance snapshot the CI system posted.
    pub payload: Value,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    pub integrity_sha256: String,
}
