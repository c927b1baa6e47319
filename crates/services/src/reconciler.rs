//! Background reconciliation: mirrors external executor state into the
//! run state machine.
//!
//! One loop per executor kind. Each tick selects a batch of executions
//! whose run is not terminal, inspects them, and projects the observation
//! into the state-event log. The unique `(run_id, status)` constraint gives
//! single-writer semantics even with overlapping ticks or multiple
//! reconciler instances. Inspect errors are logged and retried on the next
//! tick; transport cancellation suppresses the logging.

use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

use animus_api::executor::{evaluation_handle_name, ExecutorError, JobSpec, ObservedStatus};
use animus_telemetry::reconciler_metrics;
use animus_types::codec;
use animus_types::error::CoreError;
use animus_types::execution::{Evaluation, Execution, ExecutorHandle, ExecutorKind, JobKind};
use animus_types::ids;
use animus_types::run::{EventLevel, Run, RunStatus};

use crate::audit::{audit_event, lineage_event};
use crate::auth::{self, RunTokenClaims};
use crate::image;
use crate::state;
use crate::Core;

/// The actor recorded on audit events written by background loops.
const SYSTEM_ACTOR: &str = "system";

fn observed_to_status(observed: ObservedStatus) -> Option<RunStatus> {
    match observed {
        ObservedStatus::Pending => None,
        ObservedStatus::Running => Some(RunStatus::Running),
        ObservedStatus::Succeeded => Some(RunStatus::Succeeded),
        ObservedStatus::Failed => Some(RunStatus::Failed),
    }
}

fn is_cancellation(err: &ExecutorError) -> bool {
    let msg = err.to_string();
    msg.contains("canceled") || msg.contains("cancelled")
}

/// The training syncer: projects executor observations into run state.
pub struct Reconciler {
    core: Core,
    kind: ExecutorKind,
}

impl Reconciler {
    pub fn new(core: Core, kind: ExecutorKind) -> Self {
        Self { core, kind }
    }

    /// One reconcile pass. Returns the number of state transitions written.
    pub async fn tick(&self) -> Result<usize, CoreError> {
        let executor = self.core.executors.get(self.kind)?;
        let batch = self
            .core
            .store
            .executions_to_reconcile(self.kind, self.core.config.reconcile_batch)
            .await?;

        let mut transitions = 0usize;
        for execution in batch {
            let observation = match executor.inspect(&execution).await {
                Ok(observation) => observation,
                Err(e) => {
                    if !is_cancellation(&e) {
                        tracing::warn!(
                            target: "reconciler",
                            run_id = %execution.run_id,
                            error = %e,
                            "inspect failed, will retry next tick"
                        );
                        reconciler_metrics().inc_inspect_errors("training");
                    }
                    continue;
                }
            };
            let Some(status) = observed_to_status(observation.status) else {
                continue;
            };

            let now = Utc::now();
            let details = json!({
                "message": &observation.message,
                "details": &observation.details,
            });
            let mut tx = self.core.store.begin().await?;
            let written = state::project_observed(
                tx.as_mut(),
                &execution.run_id,
                status,
                Some(details),
                now,
            )
            .await?;
            if !written {
                continue;
            }

            let (level, message) = match status {
                RunStatus::Failed => (
                    EventLevel::Error,
                    observation
                        .message
                        .clone()
                        .unwrap_or_else(|| "execution failed".to_string()),
                ),
                _ => (
                    EventLevel::Info,
                    format!("execution observed {status}"),
                ),
            };
            tx.append_run_event(&execution.run_id, level, &message, now)
                .await?;
            tx.insert_audit_event(audit_event(
                SYSTEM_ACTOR,
                &format!("experiment_run.{status}"),
                "experiment_run",
                &execution.run_id,
                json!({"execution_id": &execution.execution_id, "observed": status.as_str()}),
                now,
            )?)
            .await?;
            tx.commit().await?;

            reconciler_metrics().inc_transitions(status.as_str());
            transitions += 1;
            tracing::info!(
                target: "reconciler",
                run_id = %execution.run_id,
                status = %status,
                "projected executor observation"
            );
        }
        Ok(transitions)
    }

    /// Runs until the shutdown signal flips, finishing the current tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.core.config.reconcile_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = Instant::now();
                    match self.tick().await {
                        Ok(transitions) if transitions > 0 => {
                            tracing::debug!(target: "reconciler", transitions, "tick complete");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(target: "reconciler", error = %e, "tick failed");
                        }
                    }
                    reconciler_metrics()
                        .observe_tick_duration("training", started.elapsed().as_secs_f64());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(target: "reconciler", "shutting down");
                        return;
                    }
                }
            }
        }
    }
}

/// The evaluation syncer: schedules an evaluation container for every
/// succeeded run that produced a model artifact, then mirrors its status
/// with the same projection pattern, scoped to the evaluation entity.
pub struct EvaluationSyncer {
    core: Core,
}

impl EvaluationSyncer {
    pub fn new(core: Core) -> Self {
        Self { core }
    }

    fn job_spec_for(&self, run: &Run, evaluation: &Evaluation) -> Result<JobSpec, CoreError> {
        let secret = self.core.config.run_token_secret()?;
        let datapilot_url = self.core.config.datapilot_url()?.to_string();
        let now = Utc::now();
        let run_token = auth::mint_run_token(
            secret,
            &RunTokenClaims {
                run_id: run.run_id.clone(),
                dataset_version_id: run.dataset_version_id.clone(),
                exp: now.timestamp() + self.core.config.run_token_ttl.as_secs() as i64,
            },
        )?;
        Ok(JobSpec {
            run_id: run.run_id.clone(),
            dataset_version_id: run.dataset_version_id.clone(),
            image_execution_ref: image::pinned_execution_ref(&run.image_ref, &run.image_digest),
            datapilot_url,
            run_token,
            resources: run.resources.clone(),
            job_kind: JobKind::Evaluation,
            handle: evaluation.executor_handle.clone(),
            env: Default::default(),
        })
    }

    /// Schedules evaluations for newly succeeded runs.
    async fn schedule(&self) -> Result<usize, CoreError> {
        let executor = self.core.training_executor()?;
        let kind = executor.kind();
        let runs = self
            .core
            .store
            .runs_ready_for_evaluation(self.core.config.reconcile_batch)
            .await?;

        let mut scheduled = 0usize;
        for run in runs {
            let now = Utc::now();
            let handle = match kind {
                ExecutorKind::Docker => ExecutorHandle::Docker {
                    container_name: evaluation_handle_name(&run.run_id),
                },
                ExecutorKind::KubernetesJob => ExecutorHandle::K8s {
                    namespace: self.core.config.training_namespace()?.to_string(),
                    job_name: evaluation_handle_name(&run.run_id),
                },
            };
            let mut evaluation = Evaluation {
                evaluation_id: ids::new_id("eval"),
                run_id: run.run_id.clone(),
                executor: kind,
                image_ref: run.image_ref.clone(),
                image_digest: run.image_digest.clone(),
                executor_handle: handle,
                status: RunStatus::Pending,
                created_at: now,
                updated_at: now,
                integrity_sha256: String::new(),
            };
            evaluation.integrity_sha256 = codec::record_integrity(&evaluation)?;

            let job_spec = self.job_spec_for(&run, &evaluation)?;

            let mut tx = self.core.store.begin().await?;
            if !tx.insert_evaluation(evaluation.clone()).await? {
                continue;
            }
            tx.insert_audit_event(audit_event(
                SYSTEM_ACTOR,
                "evaluation.scheduled",
                "evaluation",
                &evaluation.evaluation_id,
                json!({"run_id": &run.run_id}),
                now,
            )?)
            .await?;
            tx.insert_lineage_event(lineage_event(
                "evaluation",
                &evaluation.evaluation_id,
                "evaluates",
                "experiment_run",
                &run.run_id,
                json!({"image_digest": &run.image_digest}),
                now,
            )?)
            .await?;
            tx.commit().await?;

            if let Err(e) = executor.submit(&job_spec).await {
                let now = Utc::now();
                let mut tx = self.core.store.begin().await?;
                tx.update_evaluation_status(&evaluation.evaluation_id, RunStatus::Failed, now)
                    .await?;
                tx.insert_audit_event(audit_event(
                    SYSTEM_ACTOR,
                    "evaluation.submit_failed",
                    "evaluation",
                    &evaluation.evaluation_id,
                    json!({"error": e.to_string()}),
                    now,
                )?)
                .await?;
                tx.commit().await?;
                tracing::warn!(
                    target: "reconciler",
                    run_id = %run.run_id,
                    error = %e,
                    "evaluation submit failed"
                );
                continue;
            }
            scheduled += 1;
        }
        Ok(scheduled)
    }

    /// Mirrors executor state for non-terminal evaluations.
    async fn observe(&self) -> Result<usize, CoreError> {
        let executor = self.core.training_executor()?;
        let kind = executor.kind();
        let evaluations = self
            .core
            .store
            .evaluations_to_reconcile(kind, self.core.config.reconcile_batch)
            .await?;

        let mut transitions = 0usize;
        for evaluation in evaluations {
            // Inspect implementations only read the executor handle; the
            // evaluation is wrapped in an execution-shaped probe.
            let probe = Execution {
                execution_id: evaluation.evaluation_id.clone(),
                run_id: evaluation.run_id.clone(),
                executor: evaluation.executor,
                image_ref: evaluation.image_ref.clone(),
                image_digest: evaluation.image_digest.clone(),
                resources: Default::default(),
                executor_handle: evaluation.executor_handle.clone(),
                datapilot_url: String::new(),
                run_token_sha256: String::new(),
                created_at: evaluation.created_at,
                integrity_sha256: evaluation.integrity_sha256.clone(),
            };
            let observation = match executor.inspect(&probe).await {
                Ok(observation) => observation,
                Err(e) => {
                    if !is_cancellation(&e) {
                        tracing::warn!(
                            target: "reconciler",
                            evaluation_id = %evaluation.evaluation_id,
                            error = %e,
                            "evaluation inspect failed, will retry next tick"
                        );
                        reconciler_metrics().inc_inspect_errors("evaluation");
                    }
                    continue;
                }
            };
            let Some(status) = observed_to_status(observation.status) else {
                continue;
            };

            let now = Utc::now();
            let mut tx = self.core.store.begin().await?;
            if !tx
                .update_evaluation_status(&evaluation.evaluation_id, status, now)
                .await?
            {
                continue;
            }
            tx.insert_audit_event(audit_event(
                SYSTEM_ACTOR,
                &format!("evaluation.{status}"),
                "evaluation",
                &evaluation.evaluation_id,
                json!({"run_id": &evaluation.run_id, "observed": status.as_str()}),
                now,
            )?)
            .await?;
            tx.commit().await?;
            transitions += 1;
        }
        Ok(transitions)
    }

    /// One syncer pass: schedule new evaluations, then observe running ones.
    pub async fn tick(&self) -> Result<usize, CoreError> {
        let scheduled = self.schedule().await?;
        let observed = self.observe().await?;
        Ok(scheduled + observed)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.core.config.reconcile_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = Instant::now();
                    if let Err(e) = self.tick().await {
                        tracing::warn!(target: "reconciler", error = %e, "evaluation tick failed");
                    }
                    reconciler_metrics()
                        .observe_tick_duration("evaluation", started.elapsed().as_secs_f64());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(target: "reconciler", "evaluation syncer shutting down");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_status_mapping() {
        assert_eq!(observed_to_status(ObservedStatus::Pending), None);
        assert_eq!(
            observed_to_status(ObservedStatus::Running),
            Some(RunStatus::Running)
        );
        assert_eq!(
            observed_to_status(ObservedStatus::Succeeded),
            Some(RunStatus::Succeeded)
        );
        assert_eq!(
            observed_to_status(ObservedStatus::Failed),
            Some(RunStatus::Failed)
        );
    }

    #[test]
    fn cancellation_detection() {
        assert!(is_cancellation(&ExecutorError::Backend(
            "request canceled by shutdown".into()
        )));
        assert!(!is_cancellation(&ExecutorError::Backend("socket reset".into())));
    }
}
