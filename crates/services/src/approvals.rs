//! The two-reviewer approval coordinator.
//!
//! Resolution is not "fire an event and hope": the admin's request itself
//! runs the full submission continuation synchronously, so by the time the
//! response leaves, the run is either `running` or `failed(submit_failed)`
//! and the ledger + audit records live in the same causal chain as the
//! approval.

use chrono::Utc;
use serde_json::json;

use animus_api::identity::Actor;
use animus_types::codec;
use animus_types::error::{ApprovalError, CoreError};
use animus_types::policy::{Approval, ApprovalStatus};
use animus_types::run::{EventLevel, RunStatus};

use crate::audit::audit_event;
use crate::orchestrator;
use crate::state;
use crate::Core;

/// What the admin asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    Approve,
    Deny,
}

/// The result of resolving one approval.
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub approval: Approval,
    /// The run status after resolution, when it changed in this request.
    pub run_status: Option<RunStatus>,
    /// Set when the resolution committed but the run stays blocked because
    /// another reviewer denied an approval on it.
    pub conflict: Option<&'static str>,
}

/// Resolves one pending approval.
///
/// Contract: the resolver must hold the admin capability, must differ from
/// the requester, and the `pending → approved|denied` edge happens exactly
/// once — the approval row is locked for the whole transaction.
pub async fn resolve(
    core: &Core,
    actor: &Actor,
    approval_id: &str,
    action: ResolveAction,
    reason: Option<String>,
) -> Result<ResolveOutcome, CoreError> {
    if !actor.is_admin() {
        return Err(ApprovalError::AdminRequired.into());
    }

    // Pre-read outside the transaction to gather collaborator data (the
    // dataset gate is a network call we must not hold the row lock across).
    // Everything is re-checked under the lock below.
    let preview = core
        .store
        .get_approval(approval_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("approval {approval_id}")))?;
    let run = core
        .store
        .get_run(&preview.run_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("run {}", preview.run_id)))?;
    let dataset = core
        .gate
        .dataset_version(&run.dataset_version_id)
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
        .ok_or_else(|| {
            CoreError::NotFound(format!("dataset version {}", run.dataset_version_id))
        })?;
    let decisions = core.store.decisions_for_run(&run.run_id).await?;

    let now = Utc::now();
    let mut tx = core.store.begin().await?;
    let mut approval = tx
        .get_approval(approval_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("approval {approval_id}")))?;

    if approval.requested_by == actor.subject {
        return Err(ApprovalError::SecondReviewerRequired.into());
    }
    if approval.status != ApprovalStatus::Pending {
        return Err(ApprovalError::NotPending(approval_id.to_string()).into());
    }

    approval.status = match action {
        ResolveAction::Approve => ApprovalStatus::Approved,
        ResolveAction::Deny => ApprovalStatus::Denied,
    };
    approval.decided_by = Some(actor.subject.clone());
    approval.decided_at = Some(now);
    approval.reason = reason.clone();
    approval.integrity_sha256 = String::new();
    approval.integrity_sha256 = codec::record_integrity(&approval)?;
    tx.update_approval(approval.clone()).await?;

    let audit_action = match action {
        ResolveAction::Approve => "policy.approval.approved",
        ResolveAction::Deny => "policy.approval.denied",
    };
    tx.insert_audit_event(audit_event(
        &actor.subject,
        audit_action,
        "approval",
        approval_id,
        json!({"run_id": &approval.run_id, "reason": &reason}),
        now,
    )?)
    .await?;

    match action {
        ResolveAction::Deny => {
            // Policy denial cancels the run directly; idempotent if another
            // denial got there first.
            let mut run_status = None;
            if tx.current_status(&approval.run_id).await? == Some(RunStatus::Pending) {
                state::transition(
                    tx.as_mut(),
                    &approval.run_id,
                    RunStatus::Canceled,
                    Some(json!({"reason": "policy_denied"})),
                    now,
                )
                .await?;
                tx.append_run_event(
                    &approval.run_id,
                    EventLevel::Warn,
                    "approval denied, run canceled",
                    now,
                )
                .await?;
                run_status = Some(RunStatus::Canceled);
            }
            tx.commit().await?;
            Ok(ResolveOutcome {
                approval,
                run_status,
                conflict: None,
            })
        }
        ResolveAction::Approve => {
            let all = tx.approvals_for_run(&approval.run_id).await?;
            if all.iter().any(|a| a.status == ApprovalStatus::Denied) {
                tx.commit().await?;
                return Ok(ResolveOutcome {
                    approval,
                    run_status: None,
                    conflict: Some("approval_denied"),
                });
            }
            if all.iter().any(|a| a.status == ApprovalStatus::Pending) {
                tx.commit().await?;
                return Ok(ResolveOutcome {
                    approval,
                    run_status: None,
                    conflict: None,
                });
            }

            // All approvals resolved in favour: run the post-approval
            // continuation inside this same transaction.
            let run = tx
                .get_run(&approval.run_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("run {}", approval.run_id)))?;
            let (_execution, job_spec) = orchestrator::stage_execution(
                core,
                tx.as_mut(),
                &actor.subject,
                &run,
                &dataset,
                &decisions,
                &all,
                now,
            )
            .await?;
            tx.commit().await?;

            let status =
                orchestrator::launch(core, &actor.subject, &approval.run_id, &job_spec).await?;
            Ok(ResolveOutcome {
                approval,
                run_status: Some(status),
                conflict: None,
            })
        }
    }
}
