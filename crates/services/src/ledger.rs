//! The execution ledger.
//!
//! On execution materialization the ledger assembles two documents: the
//! entry (human/audit view, embedding the governance context) and the
//! replay bundle (strictly the inputs needed to recreate the run — no
//! timestamps, no actor identities). The canonical SHA-256 of the replay
//! bundle is the `execution_hash`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use animus_types::codec;
use animus_types::dataset::DatasetVersion;
use animus_types::error::{CoreError, StateError};
use animus_types::execution::Execution;
use animus_types::ids;
use animus_types::ledger::{
    LedgerDataset, LedgerEntry, LedgerEntryDoc, LedgerGit, LedgerImage, ReplayBundle,
    LEDGER_ENTRY_SCHEMA, REPLAY_BUNDLE_SCHEMA,
};
use animus_types::policy::{Approval, PolicyDecision};
use animus_types::run::Run;

fn ledger_dataset(run: &Run, dataset: &DatasetVersion) -> LedgerDataset {
    LedgerDataset {
        id: dataset.dataset_id.clone(),
        version: run.dataset_version_id.clone(),
        sha256: dataset.sha256.clone(),
    }
}

fn ledger_git(run: &Run) -> LedgerGit {
    LedgerGit {
        repo: run.git_repo.clone(),
        commit: run.git_commit.clone(),
        r#ref: run.git_ref.clone(),
    }
}

/// Builds the replay bundle for a run/execution pair.
pub fn build_replay_bundle(
    run: &Run,
    execution: &Execution,
    dataset: &DatasetVersion,
) -> ReplayBundle {
    ReplayBundle {
        schema: REPLAY_BUNDLE_SCHEMA.to_string(),
        run_id: run.run_id.clone(),
        experiment_id: run.experiment_id.clone(),
        dataset: ledger_dataset(run, dataset),
        git: ledger_git(run),
        image: LedgerImage {
            r#ref: execution.image_ref.clone(),
            digest: execution.image_digest.clone(),
        },
        executor: execution.executor.as_str().to_string(),
        resources: execution.resources.clone(),
        params: run.params.clone(),
    }
}

/// Assembles the persistable ledger row. Fails with
/// `ErrLedgerPrerequisitesMissing` when the image digest or dataset hash is
/// absent — an unpinned or unhashed execution must never be ledgered.
pub fn assemble(
    run: &Run,
    execution: &Execution,
    dataset: &DatasetVersion,
    decisions: &[PolicyDecision],
    approvals: &[Approval],
    at: DateTime<Utc>,
) -> Result<LedgerEntry, CoreError> {
    if execution.image_digest.is_empty() {
        return Err(StateError::LedgerPrerequisitesMissing("image_digest".into()).into());
    }
    if dataset.sha256.is_empty() {
        return Err(StateError::LedgerPrerequisitesMissing("dataset sha256".into()).into());
    }

    let entry = LedgerEntryDoc {
        schema: LEDGER_ENTRY_SCHEMA.to_string(),
        run_id: run.run_id.clone(),
        execution_id: execution.execution_id.clone(),
        experiment_id: run.experiment_id.clone(),
        dataset: ledger_dataset(run, dataset),
        git: ledger_git(run),
        image: LedgerImage {
            r#ref: execution.image_ref.clone(),
            digest: execution.image_digest.clone(),
        },
        executor: execution.executor.as_str().to_string(),
        resources: execution.resources.clone(),
        params: run.params.clone(),
        policy_decisions: decisions.to_vec(),
        approvals: approvals.to_vec(),
    };
    let replay = build_replay_bundle(run, execution, dataset);

    let entry_value = serde_json::to_value(&entry)
        .map_err(|e| CoreError::Internal(format!("ledger entry: {e}")))?;
    let replay_value = serde_json::to_value(&replay)
        .map_err(|e| CoreError::Internal(format!("replay bundle: {e}")))?;

    let mut row = LedgerEntry {
        ledger_id: ids::new_id("led"),
        run_id: run.run_id.clone(),
        execution_id: execution.execution_id.clone(),
        entry_sha256: codec::integrity_sha256(&entry_value)?,
        execution_hash: codec::integrity_sha256(&replay_value)?,
        entry: entry_value,
        replay_bundle: replay_value,
        created_at: at,
        integrity_sha256: String::new(),
    };
    row.integrity_sha256 = codec::record_integrity(&row)?;
    Ok(row)
}

/// The transport-tamper checksum every ledger query exposes: SHA-256 over
/// the canonical JSON array of the returned entries.
pub fn slice_checksum<T: Serialize>(items: &[T]) -> Result<String, CoreError> {
    Ok(codec::integrity_sha256(&items)?)
}
