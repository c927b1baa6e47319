//! Evidence bundle records and the bundle manifest schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;

/// Schema tag of `manifest.json` inside an evidence bundle.
pub const EVIDENCE_MANIFEST_SCHEMA: &str = "animus.evidence_bundle.v1";
/// The only signature algorithm evidence bundles carry.
pub const EVIDENCE_SIGNATURE_ALG: &str = "hmac-sha256";

/// One file entry in `manifest.json`. Entries are sorted by `name` so the
/// manifest is byte-identical across builds of the same run state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFile {
    pub name: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub content_type: String,
}

/// The manifest document embedded in every bundle. Deliberately carries no
/// timestamp: determinism over provenance, which the audit log supplies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceManifest {
    pub schema: String,
    pub run_id: String,
    pub files: Vec<ManifestFile>,
}

/// The persisted record of a built bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceBundle {
    pub bundle_id: String,
    pub run_id: String,
    pub bundle_object_key: String,
    pub report_object_key: String,
    pub bundle_sha256: String,
    pub bundle_size_bytes: u64,
    /// `base64url(HMAC-SHA256(service_secret, bundle_sha256))`, raw (no
    /// padding).
    pub signature: String,
    pub signature_alg: String,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    pub integrity_sha256: String,
}
