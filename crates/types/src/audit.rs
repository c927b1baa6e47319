//! Append-only audit and lineage event logs.
//!
//! Both logs are event streams of subject/predicate/object tuples with
//! opaque payloads. There is no mutable graph: subgraph views are
//! reconstructed per request from the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;

/// Resource types whose audit events are eligible for evidence bundles.
pub const AUDIT_RESOURCE_WHITELIST: &[&str] = &[
    "experiment_run",
    "execution",
    "dataset_version",
    "policy_decision",
    "approval",
    "ledger_entry",
    "evidence_bundle",
];

/// One append-only audit event. Every mutating write in the core commits in
/// the same transaction as at least one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub audit_id: String,
    /// The subject that caused the action ("system" for reconcilers).
    pub actor_subject: String,
    /// Dotted action name, e.g. `experiment_run.execute`.
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub payload: Value,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    pub integrity_sha256: String,
}

/// One append-only lineage event: `(subject, predicate, object)` plus an
/// opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineageEvent {
    pub lineage_id: String,
    pub subject_type: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_type: String,
    pub object_id: String,
    pub payload: Value,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    pub integrity_sha256: String,
}
