//! The execution ledger: the durable record of an execution's inputs and
//! the canonical replay bundle whose hash is the reproducibility
//! fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::execution::Resources;
use crate::policy::{Approval, PolicyDecision};

/// Schema tag of the human/audit ledger entry document.
pub const LEDGER_ENTRY_SCHEMA: &str = "animus.execution_ledger.v1";
/// Schema tag of the replay bundle document.
pub const REPLAY_BUNDLE_SCHEMA: &str = "animus.execution_replay.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerDataset {
    pub id: String,
    pub version: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerGit {
    pub repo: String,
    pub commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerImage {
    pub r#ref: String,
    pub digest: String,
}

/// The human/audit view of an execution. Embeds the governance context
/// (decisions and approvals) alongside the run inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntryDoc {
    pub schema: String,
    pub run_id: String,
    pub execution_id: String,
    pub experiment_id: String,
    pub dataset: LedgerDataset,
    pub git: LedgerGit,
    pub image: LedgerImage,
    pub executor: String,
    pub resources: Resources,
    pub params: Value,
    pub policy_decisions: Vec<PolicyDecision>,
    pub approvals: Vec<Approval>,
}

/// The reproduction view: strictly the inputs required to recreate the run.
/// No timestamps, no actor identities — its canonical SHA-256 is the
/// `execution_hash` and must not move when bookkeeping fields do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayBundle {
    pub schema: String,
    pub run_id: String,
    pub experiment_id: String,
    pub dataset: LedgerDataset,
    pub git: LedgerGit,
    pub image: LedgerImage,
    pub executor: String,
    pub resources: Resources,
    pub params: Value,
}

/// The persisted ledger row. Unique on `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub ledger_id: String,
    pub run_id: String,
    pub execution_id: String,
    pub entry: Value,
    pub entry_sha256: String,
    pub execution_hash: String,
    pub replay_bundle: Value,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    pub integrity_sha256: String,
}
