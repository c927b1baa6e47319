//! The run orchestrator: the one pipeline that drives a submission from
//! validation through policy to a launched container.
//!
//! The allow path and the post-approval continuation share the same code
//! (`stage_execution` + `launch`): an approved run is materialized, ledgered
//! and submitted by exactly the same path as a straight-through allowed
//! one, so ledger and audit always live in the same causal chain.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use animus_api::executor::{
    training_handle_name, ExecutorError, JobSpec,
};
use animus_api::identity::Actor;
use animus_api::store::StoreTx;
use animus_types::codec;
use animus_types::dataset::DatasetVersion;
use animus_types::error::{
    AuthError, CoreError, PreconditionError, StateError, UpstreamError, ValidationError,
};
use animus_types::execution::{Execution, ExecutorHandle, ExecutorKind, JobKind, Resources};
use animus_types::ids;
use animus_types::policy::{
    Approval, ApprovalStatus, ContextDataset, ContextGit, ContextImage, DecisionEffect,
    PolicyContext, PolicyDecision,
};
use animus_types::run::{EventLevel, Run, RunStatus};

use crate::audit::{audit_event, lineage_event};
use crate::auth::{self, RunTokenClaims};
use crate::image::{self, ResolvedImage};
use crate::ledger;
use crate::policy;
use crate::state;
use crate::Core;

/// A run submission as received from the API surface.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRunRequest {
    pub experiment_id: String,
    pub dataset_version_id: String,
    pub git_repo: String,
    pub git_commit: String,
    #[serde(default)]
    pub git_ref: Option<String>,
    pub image_ref: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub artifacts_prefix: Option<String>,
}

/// What a submission produced.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The allow path ran to completion; the run is `running` (or the
    /// launch step surfaced an error and the run is `failed`).
    Started { run: Run, status: RunStatus },
    /// Policy requires approval; the run is parked in `pending`.
    ApprovalRequired {
        run: Run,
        approvals: Vec<Approval>,
        decisions: Vec<PolicyDecision>,
    },
}

/// The dry-run response (richer shape: derived state and plan existence).
#[derive(Debug, Clone, Serialize)]
pub struct DryRunResponse {
    pub decision: DecisionEffect,
    pub decisions: Vec<PolicyDecision>,
    /// The status the run would enter if submitted.
    pub state: RunStatus,
    /// Whether an execution would be materialized.
    pub plan_exists: bool,
    pub attempts_by_step: BTreeMap<String, u32>,
}

fn validate(request: &SubmitRunRequest) -> Result<Value, CoreError> {
    if request.experiment_id.trim().is_empty() {
        return Err(ValidationError::InvalidSpec("experiment_id is required".into()).into());
    }
    if request.dataset_version_id.trim().is_empty() {
        return Err(ValidationError::InvalidSpec("dataset_version_id is required".into()).into());
    }
    if request.git_commit.trim().is_empty() {
        return Err(PreconditionError::GitCommitRequired.into());
    }
    if request.git_repo.trim().is_empty() {
        return Err(ValidationError::InvalidSpec("git_repo is required".into()).into());
    }
    if request.image_ref.trim().is_empty() {
        return Err(animus_types::error::ImageError::RefRequired.into());
    }
    let params = request.params.clone().unwrap_or_else(|| json!({}));
    if !params.is_object() {
        return Err(ValidationError::InvalidParams("params must be a JSON object".into()).into());
    }
    Ok(params)
}

/// Extracts a caller-supplied env map from `params.env`, if present.
fn env_from_params(params: &Value) -> Result<BTreeMap<String, String>, CoreError> {
    let mut env = BTreeMap::new();
    if let Some(map) = params.get("env") {
        let obj = map.as_object().ok_or_else(|| {
            CoreError::from(ValidationError::InvalidParams("params.env must be an object".into()))
        })?;
        for (k, v) in obj {
            let value = v.as_str().ok_or_else(|| {
                CoreError::from(ValidationError::InvalidParams(format!(
                    "params.env.{k} must be a string"
                )))
            })?;
            env.insert(k.clone(), value.to_string());
        }
    }
    Ok(env)
}

struct PreparedSubmission {
    dataset: DatasetVersion,
    resolved: ResolvedImage,
    context: PolicyContext,
    params: Value,
}

/// Phases 1–2 of the pipeline: validation, dataset gate, git/attestation
/// reconciliation, image resolution and context construction. No
/// persistence.
async fn prepare(
    core: &Core,
    actor: &Actor,
    request: &SubmitRunRequest,
) -> Result<PreparedSubmission, CoreError> {
    let params = validate(request)?;

    let dataset = core
        .gate
        .dataset_version(&request.dataset_version_id)
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
        .ok_or_else(|| {
            CoreError::NotFound(format!("dataset version {}", request.dataset_version_id))
        })?;
    if !dataset.passes_quality_gate() {
        return Err(PreconditionError::QualityGateFailed {
            dataset_version_id: dataset.dataset_version_id.clone(),
            quality: dataset.quality.clone(),
        }
        .into());
    }

    let executor = core.training_executor()?;
    let resolved = image::resolve(executor.as_ref(), &request.image_ref).await?;

    let mut meta: BTreeMap<String, Value> = BTreeMap::new();
    meta.insert(
        "image_execution_ref".into(),
        Value::String(resolved.execution_ref.clone()),
    );
    if let Some(attestation) = core
        .store
        .attestation_for_digest(&resolved.image_digest)
        .await?
    {
        if attestation.git_repo != request.git_repo {
            return Err(PreconditionError::GitRepoConflict {
                submitted: request.git_repo.clone(),
                attested: attestation.git_repo,
            }
            .into());
        }
        if attestation.git_commit != request.git_commit {
            return Err(PreconditionError::GitCommitConflict {
                submitted: request.git_commit.clone(),
                attested: attestation.git_commit,
            }
            .into());
        }
        meta.insert(
            "scm_attestation".into(),
            json!({
                "attestation_id": attestation.attestation_id,
                "governance": attestation.payload,
            }),
        );
    }

    let context = PolicyContext {
        actor: actor.as_context_actor(),
        dataset: ContextDataset {
            id: dataset.dataset_id.clone(),
            version: dataset.dataset_version_id.clone(),
            sha256: dataset.sha256.clone(),
            quality: dataset.quality.clone(),
        },
        experiment_id: request.experiment_id.clone(),
        git: ContextGit {
            repo: request.git_repo.clone(),
            commit: request.git_commit.clone(),
            r#ref: request.git_ref.clone(),
        },
        image: ContextImage {
            r#ref: resolved.image_ref.clone(),
            digest: resolved.image_digest.clone(),
        },
        resources: request.resources.clone(),
        meta,
    };

    Ok(PreparedSubmission {
        dataset,
        resolved,
        context,
        params,
    })
}

fn build_run(
    actor: &Actor,
    request: &SubmitRunRequest,
    resolved: &ResolvedImage,
    params: Value,
    at: DateTime<Utc>,
) -> Result<Run, CoreError> {
    let run_id = ids::new_id("run");
    let mut run = Run {
        artifacts_prefix: request
            .artifacts_prefix
            .clone()
            .unwrap_or_else(|| format!("runs/{run_id}")),
        run_id,
        experiment_id: request.experiment_id.clone(),
        dataset_version_id: request.dataset_version_id.clone(),
        git_repo: request.git_repo.clone(),
        git_commit: request.git_commit.clone(),
        git_ref: request.git_ref.clone(),
        image_ref: resolved.image_ref.clone(),
        image_digest: resolved.image_digest.clone(),
        params,
        resources: request.resources.clone(),
        created_by: actor.subject.clone(),
        created_at: at,
        integrity_sha256: String::new(),
    };
    run.integrity_sha256 = codec::record_integrity(&run)?;
    Ok(run)
}

/// Materializes the execution, writes the ledger row and parks the run in
/// `pending`, all inside the caller's transaction. This is the shared body
/// of the allow path and the post-approval continuation.
pub(crate) async fn stage_execution(
    core: &Core,
    tx: &mut dyn StoreTx,
    actor_subject: &str,
    run: &Run,
    dataset: &DatasetVersion,
    decisions: &[PolicyDecision],
    approvals: &[Approval],
    at: DateTime<Utc>,
) -> Result<(Execution, JobSpec), CoreError> {
    let executor = core.training_executor()?;
    let kind = executor.kind();

    let secret = core.config.run_token_secret()?;
    let datapilot_url = core.config.datapilot_url()?.to_string();
    let claims = RunTokenClaims {
        run_id: run.run_id.clone(),
        dataset_version_id: run.dataset_version_id.clone(),
        exp: at.timestamp() + core.config.run_token_ttl.as_secs() as i64,
    };
    let run_token = auth::mint_run_token(secret, &claims)?;

    let handle = match kind {
        ExecutorKind::Docker => ExecutorHandle::Docker {
            container_name: training_handle_name(&run.run_id),
        },
        ExecutorKind::KubernetesJob => ExecutorHandle::K8s {
            namespace: core.config.training_namespace()?.to_string(),
            job_name: training_handle_name(&run.run_id),
        },
    };

    let execution_ref =
        image::pinned_execution_ref(&run.image_ref, &run.image_digest);
    let mut execution = Execution {
        execution_id: ids::new_id("ex"),
        run_id: run.run_id.clone(),
        executor: kind,
        image_ref: run.image_ref.clone(),
        image_digest: run.image_digest.clone(),
        resources: run.resources.clone(),
        executor_handle: handle.clone(),
        datapilot_url: datapilot_url.clone(),
        run_token_sha256: auth::run_token_sha256(&run_token),
        created_at: at,
        integrity_sha256: String::new(),
    };
    execution.integrity_sha256 = codec::record_integrity(&execution)?;

    if !tx.insert_execution(execution.clone()).await? {
        return Err(StateError::ExecutionAlreadyExists(run.run_id.clone()).into());
    }

    let entry = ledger::assemble(run, &execution, dataset, decisions, approvals, at)?;
    if !tx.insert_ledger_entry(entry.clone()).await? {
        return Err(StateError::LedgerAlreadyExists(run.run_id.clone()).into());
    }

    // First submission appends `pending`; the approval continuation finds
    // it already there and the unique constraint collapses the write.
    match tx.current_status(&run.run_id).await? {
        None => {
            state::transition(tx, &run.run_id, RunStatus::Pending, None, at).await?;
        }
        Some(RunStatus::Pending) => {}
        Some(other) => {
            return Err(StateError::InvalidTransition {
                from: other.as_str().to_string(),
                to: RunStatus::Pending.as_str().to_string(),
            }
            .into());
        }
    }

    tx.insert_audit_event(audit_event(
        actor_subject,
        "experiment_run.execute",
        "execution",
        &execution.execution_id,
        json!({"run_id": &run.run_id, "executor": kind.as_str(), "handle": handle.name()}),
        at,
    )?)
    .await?;
    tx.insert_lineage_event(lineage_event(
        "execution",
        &execution.execution_id,
        "executes",
        "experiment_run",
        &run.run_id,
        json!({"execution_hash": &entry.execution_hash}),
        at,
    )?)
    .await?;

    // `env` carries only the caller-supplied entries; executors merge in
    // the reserved keys from the spec's own fields at submit time.
    let job_spec = JobSpec {
        run_id: run.run_id.clone(),
        dataset_version_id: run.dataset_version_id.clone(),
        image_execution_ref: execution_ref,
        datapilot_url,
        run_token,
        resources: run.resources.clone(),
        job_kind: JobKind::Training,
        handle,
        env: env_from_params(&run.params)?,
    };
    job_spec
        .validate_env()
        .map_err(|e| ValidationError::InvalidSpec(e.to_string()))?;

    Ok((execution, job_spec))
}

/// Submits the staged job. On success the run moves to `running` (or keeps
/// the status a racing reconciler already observed) and the current status
/// is returned; on executor failure the compensating transition to
/// `failed(submit_failed)` is committed and the upstream error is surfaced.
pub(crate) async fn launch(
    core: &Core,
    actor_subject: &str,
    run_id: &str,
    job_spec: &JobSpec,
) -> Result<RunStatus, CoreError> {
    // Caller-supplied env was validated at stage time; the reserved keys
    // present now are the ones the control plane itself injected.
    let executor = core.training_executor()?;

    match executor.submit(job_spec).await {
        Ok(()) => {
            // The container exists from the moment `submit` returns, so a
            // concurrent reconciler tick may have projected `running` (or
            // even a terminal status) before we get here. Like the pending
            // write in `stage_execution`, this transition collapses on the
            // unique constraint instead of erroring.
            let now = Utc::now();
            let mut tx = core.store.begin().await?;
            let written =
                state::project_observed(tx.as_mut(), run_id, RunStatus::Running, None, now)
                    .await?;
            if written {
                tx.append_run_event(run_id, EventLevel::Info, "executor accepted job", now)
                    .await?;
                tx.insert_audit_event(audit_event(
                    actor_subject,
                    "experiment_run.running",
                    "experiment_run",
                    run_id,
                    json!({"handle": job_spec.handle.name()}),
                    now,
                )?)
                .await?;
            }
            let status = tx
                .current_status(run_id)
                .await?
                .unwrap_or(RunStatus::Running);
            tx.commit().await?;
            Ok(status)
        }
        Err(e) => {
            let reason = match &e {
                ExecutorError::ReservedEnvKey(k) => format!("reserved env key {k}"),
                other => other.to_string(),
            };
            // Same projection as the success arm: a reconciler that saw a
            // half-started container may already have written a terminal
            // state, and this compensation must not fight it.
            let now = Utc::now();
            let mut tx = core.store.begin().await?;
            let written = state::project_observed(
                tx.as_mut(),
                run_id,
                RunStatus::Failed,
                Some(json!({"reason": "submit_failed", "error": &reason})),
                now,
            )
            .await?;
            if written {
                tx.append_run_event(
                    run_id,
                    EventLevel::Error,
                    &format!("submit failed: {reason}"),
                    now,
                )
                .await?;
                tx.insert_audit_event(audit_event(
                    actor_subject,
                    "experiment_run.submit_failed",
                    "experiment_run",
                    run_id,
                    json!({"error": &reason}),
                    now,
                )?)
                .await?;
            }
            tx.commit().await?;
            Err(UpstreamError::TrainingSubmit(reason).into())
        }
    }
}

/// Drives a submission end to end.
pub async fn submit(
    core: &Core,
    actor: &Actor,
    request: SubmitRunRequest,
) -> Result<SubmitOutcome, CoreError> {
    let now = Utc::now();
    let prepared = prepare(core, actor, &request).await?;
    // Reject malformed caller env before anything persists.
    let env = env_from_params(&prepared.params)?;
    for key in env.keys() {
        if animus_api::executor::RESERVED_ENV_KEYS.contains(&key.as_str()) {
            return Err(
                ValidationError::InvalidSpec(format!("params.env.{key} is a reserved key")).into(),
            );
        }
    }

    let run = build_run(actor, &request, &prepared.resolved, prepared.params.clone(), now)?;
    let outcome = policy::evaluate(core.store.as_ref(), &prepared.context, Some(&run.run_id), now)
        .await?;

    let mut tx = core.store.begin().await?;
    tx.insert_run(run.clone()).await?;
    tx.insert_audit_event(audit_event(
        &actor.subject,
        "experiment_run.submit",
        "experiment_run",
        &run.run_id,
        json!({
            "experiment_id": &run.experiment_id,
            "dataset_version_id": &run.dataset_version_id,
            "image_digest": &run.image_digest,
            "context_sha256": &outcome.context_sha256,
        }),
        now,
    )?)
    .await?;
    tx.insert_lineage_event(lineage_event(
        "experiment_run",
        &run.run_id,
        "uses_dataset",
        "dataset_version",
        &run.dataset_version_id,
        json!({"sha256": &prepared.dataset.sha256}),
        now,
    )?)
    .await?;
    tx.insert_lineage_event(lineage_event(
        "experiment_run",
        &run.run_id,
        "runs_image",
        "image",
        &run.image_digest,
        json!({"image_ref": &run.image_ref}),
        now,
    )?)
    .await?;
    for decision in &outcome.decisions {
        tx.insert_decision(decision.clone()).await?;
    }

    match outcome.aggregate {
        DecisionEffect::Deny => {
            let rule_id = outcome.deciding_rule();
            tx.insert_audit_event(audit_event(
                &actor.subject,
                "policy.denied",
                "experiment_run",
                &run.run_id,
                json!({"rule_id": &rule_id}),
                now,
            )?)
            .await?;
            state::transition(
                tx.as_mut(),
                &run.run_id,
                RunStatus::Canceled,
                Some(json!({"reason": "policy_denied"})),
                now,
            )
            .await?;
            tx.append_run_event(&run.run_id, EventLevel::Warn, "denied by policy", now)
                .await?;
            tx.commit().await?;
            Err(AuthError::PolicyDenied { rule_id }.into())
        }
        DecisionEffect::RequireApproval => {
            let mut approvals = Vec::new();
            for decision in outcome
                .decisions
                .iter()
                .filter(|d| d.decision == DecisionEffect::RequireApproval)
            {
                let mut approval = Approval {
                    approval_id: ids::new_id("apr"),
                    decision_id: decision.decision_id.clone(),
                    run_id: run.run_id.clone(),
                    status: ApprovalStatus::Pending,
                    requested_by: actor.subject.clone(),
                    requested_at: now,
                    decided_at: None,
                    decided_by: None,
                    reason: None,
                    integrity_sha256: String::new(),
                };
                approval.integrity_sha256 = codec::record_integrity(&approval)?;
                tx.insert_approval(approval.clone()).await?;
                tx.insert_audit_event(audit_event(
                    &actor.subject,
                    "policy.approval.requested",
                    "approval",
                    &approval.approval_id,
                    json!({"run_id": &run.run_id, "decision_id": &decision.decision_id}),
                    now,
                )?)
                .await?;
                approvals.push(approval);
            }
            state::transition(
                tx.as_mut(),
                &run.run_id,
                RunStatus::Pending,
                Some(json!({"reason": "approval_required"})),
                now,
            )
            .await?;
            tx.commit().await?;
            Ok(SubmitOutcome::ApprovalRequired {
                run,
                approvals,
                decisions: outcome.decisions,
            })
        }
        DecisionEffect::Allow => {
            let (_execution, job_spec) = stage_execution(
                core,
                tx.as_mut(),
                &actor.subject,
                &run,
                &prepared.dataset,
                &outcome.decisions,
                &[],
                now,
            )
            .await?;
            tx.commit().await?;

            let status = launch(core, &actor.subject, &run.run_id, &job_spec).await?;
            Ok(SubmitOutcome::Started { run, status })
        }
    }
}

/// Evaluates the pipeline for a spec without persisting anything.
pub async fn dry_run(
    core: &Core,
    actor: &Actor,
    request: SubmitRunRequest,
) -> Result<DryRunResponse, CoreError> {
    let now = Utc::now();
    let prepared = prepare(core, actor, &request).await?;
    let outcome = policy::evaluate(core.store.as_ref(), &prepared.context, None, now).await?;

    let state = match outcome.aggregate {
        DecisionEffect::Deny => RunStatus::Canceled,
        DecisionEffect::RequireApproval | DecisionEffect::Allow => RunStatus::Pending,
    };
    let mut attempts_by_step = BTreeMap::new();
    for step in ["validate", "dataset_gate", "image_resolve", "policy_eval"] {
        attempts_by_step.insert(step.to_string(), 1);
    }

    Ok(DryRunResponse {
        decision: outcome.aggregate,
        decisions: outcome.decisions,
        state,
        plan_exists: outcome.aggregate != DecisionEffect::Deny,
        attempts_by_step,
    })
}

/// Cancels a run that has not started executing.
pub async fn cancel(
    core: &Core,
    actor: &Actor,
    run_id: &str,
    reason: Option<String>,
) -> Result<RunStatus, CoreError> {
    let now = Utc::now();
    if core.store.get_run(run_id).await?.is_none() {
        return Err(CoreError::NotFound(format!("run {run_id}")));
    }

    let mut tx = core.store.begin().await?;
    state::transition(
        tx.as_mut(),
        run_id,
        RunStatus::Canceled,
        Some(json!({"reason": reason.clone().unwrap_or_else(|| "user_canceled".into())})),
        now,
    )
    .await?;
    tx.append_run_event(run_id, EventLevel::Warn, "run canceled", now)
        .await?;
    tx.insert_audit_event(audit_event(
        &actor.subject,
        "experiment_run.canceled",
        "experiment_run",
        run_id,
        json!({"reason": &reason}),
        now,
    )?)
    .await?;
    tx.commit().await?;
    Ok(RunStatus::Canceled)
}
