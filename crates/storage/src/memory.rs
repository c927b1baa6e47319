//! The in-memory `MetaStore`.
//!
//! A transaction takes the store lock for its whole lifetime and mutates a
//! staged clone of the state; commit swaps the clone in, drop discards it.
//! Uniqueness constraints are checked against the staged state, so a
//! transaction observes its own writes exactly like a SQL session would.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use animus_api::store::{MetaStore, StoreTx};
use animus_types::audit::{AuditEvent, LineageEvent};
use animus_types::error::StoreError;
use animus_types::evidence::EvidenceBundle;
use animus_types::execution::{Evaluation, Execution, ExecutorKind};
use animus_types::ledger::LedgerEntry;
use animus_types::policy::{
    Approval, ApprovalStatus, PolicyDecision, PolicyVersion, PolicyVersionStatus,
};
use animus_types::run::{
    Artifact, ArtifactKind, EventLevel, MetricSample, Run, RunEvent, RunStateEvent, RunStatus,
};
use animus_types::scm::ImageAttestation;

#[derive(Debug, Default, Clone)]
struct State {
    runs: BTreeMap<String, Run>,
    state_events: Vec<RunStateEvent>,
    /// Keyed by `run_id`: at most one execution per run.
    executions: BTreeMap<String, Execution>,
    /// Keyed by `run_id`: at most one ledger entry per run.
    ledger: BTreeMap<String, LedgerEntry>,
    decisions: Vec<PolicyDecision>,
    approvals: BTreeMap<String, Approval>,
    /// Keyed by `(run_id, name, step)`.
    metrics: BTreeMap<(String, String, u64), MetricSample>,
    run_events: BTreeMap<String, Vec<RunEvent>>,
    audit: Vec<AuditEvent>,
    lineage: Vec<LineageEvent>,
    bundles: Vec<EvidenceBundle>,
    artifacts: Vec<Artifact>,
    policy_versions: Vec<PolicyVersion>,
    attestations: Vec<ImageAttestation>,
    /// Keyed by `run_id`: at most one evaluation per run.
    evaluations: BTreeMap<String, Evaluation>,
}

impl State {
    fn current_status(&self, run_id: &str) -> Option<RunStatus> {
        self.state_events
            .iter()
            .filter(|e| e.run_id == run_id)
            .max_by(|a, b| {
                (a.observed_at, &a.state_id).cmp(&(b.observed_at, &b.state_id))
            })
            .map(|e| e.status)
    }

    fn ordered_state_events(&self, run_id: &str) -> Vec<RunStateEvent> {
        let mut events: Vec<_> = self
            .state_events
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| (a.observed_at, &a.state_id).cmp(&(b.observed_at, &b.state_id)));
        events
    }
}

/// The in-memory store. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<State>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl StoreTx for MemTx {
    async fn get_run(&mut self, run_id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.staged.runs.get(run_id).cloned())
    }

    async fn current_status(&mut self, run_id: &str) -> Result<Option<RunStatus>, StoreError> {
        Ok(self.staged.current_status(run_id))
    }

    async fn execution_for_run(
        &mut self,
        run_id: &str,
    ) -> Result<Option<Execution>, StoreError> {
        Ok(self.staged.executions.get(run_id).cloned())
    }

    async fn ledger_for_run(&mut self, run_id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.staged.ledger.get(run_id).cloned())
    }

    async fn get_approval(&mut self, approval_id: &str) -> Result<Option<Approval>, StoreError> {
        // The transaction holds the store lock, so this read *is* the row
        // lock: no other resolver can observe the row until commit.
        Ok(self.staged.approvals.get(approval_id).cloned())
    }

    async fn approvals_for_run(&mut self, run_id: &str) -> Result<Vec<Approval>, StoreError> {
        Ok(self
            .staged
            .approvals
            .values()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn insert_run(&mut self, run: Run) -> Result<(), StoreError> {
        if self.staged.runs.contains_key(&run.run_id) {
            return Err(StoreError::Backend(format!(
                "duplicate run id {}",
                run.run_id
            )));
        }
        self.staged.runs.insert(run.run_id.clone(), run);
        Ok(())
    }

    async fn append_state_event(&mut self, event: RunStateEvent) -> Result<bool, StoreError> {
        let exists = self
            .staged
            .state_events
            .iter()
            .any(|e| e.run_id == event.run_id && e.status == event.status);
        if exists {
            return Ok(false);
        }
        self.staged.state_events.push(event);
        Ok(true)
    }

    async fn insert_execution(&mut self, execution: Execution) -> Result<bool, StoreError> {
        if self.staged.executions.contains_key(&execution.run_id) {
            return Ok(false);
        }
        self.staged
            .executions
            .insert(execution.run_id.clone(), execution);
        Ok(true)
    }

    async fn insert_ledger_entry(&mut self, entry: LedgerEntry) -> Result<bool, StoreError> {
        if self.staged.ledger.contains_key(&entry.run_id) {
            return Ok(false);
        }
        self.staged.ledger.insert(entry.run_id.clone(), entry);
        Ok(true)
    }

    async fn insert_decision(&mut self, decision: PolicyDecision) -> Result<(), StoreError> {
        self.staged.decisions.push(decision);
        Ok(())
    }

    async fn insert_approval(&mut self, approval: Approval) -> Result<(), StoreError> {
        self.staged
            .approvals
            .insert(approval.approval_id.clone(), approval);
        Ok(())
    }

    async fn update_approval(&mut self, approval: Approval) -> Result<(), StoreError> {
        if !self.staged.approvals.contains_key(&approval.approval_id) {
            return Err(StoreError::NotFound(approval.approval_id));
        }
        self.staged
            .approvals
            .insert(approval.approval_id.clone(), approval);
        Ok(())
    }

    async fn insert_metric_sample(&mut self, sample: MetricSample) -> Result<bool, StoreError> {
        let key = (sample.run_id.clone(), sample.name.clone(), sample.step);
        if self.staged.metrics.contains_key(&key) {
            return Ok(false);
        }
        self.staged.metrics.insert(key, sample);
        Ok(true)
    }

    async fn append_run_event(
        &mut self,
        run_id: &str,
        level: EventLevel,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<RunEvent, StoreError> {
        let events = self.staged.run_events.entry(run_id.to_string()).or_default();
        let event = RunEvent {
            event_id: events.len() as u64 + 1,
            run_id: run_id.to_string(),
            level,
            message: message.to_string(),
            created_at: at,
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn insert_audit_event(&mut self, event: AuditEvent) -> Result<(), StoreError> {
        self.staged.audit.push(event);
        Ok(())
    }

    async fn insert_lineage_event(&mut self, event: LineageEvent) -> Result<(), StoreError> {
        self.staged.lineage.push(event);
        Ok(())
    }

    async fn insert_evidence_bundle(&mut self, bundle: EvidenceBundle) -> Result<(), StoreError> {
        self.staged.bundles.push(bundle);
        Ok(())
    }

    async fn insert_artifact(&mut self, artifact: Artifact) -> Result<(), StoreError> {
        self.staged.artifacts.push(artifact);
        Ok(())
    }

    async fn upsert_policy_version(&mut self, version: PolicyVersion) -> Result<(), StoreError> {
        self.staged
            .policy_versions
            .retain(|v| v.policy_version_id != version.policy_version_id);
        self.staged.policy_versions.push(version);
        Ok(())
    }

    async fn insert_attestation(
        &mut self,
        attestation: ImageAttestation,
    ) -> Result<(), StoreError> {
        self.staged.attestations.push(attestation);
        Ok(())
    }

    async fn insert_evaluation(&mut self, evaluation: Evaluation) -> Result<bool, StoreError> {
        if self.staged.evaluations.contains_key(&evaluation.run_id) {
            return Ok(false);
        }
        self.staged
            .evaluations
            .insert(evaluation.run_id.clone(), evaluation);
        Ok(true)
    }

    async fn update_evaluation_status(
        &mut self,
        evaluation_id: &str,
        status: RunStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let eval = self
            .staged
            .evaluations
            .values_mut()
            .find(|e| e.evaluation_id == evaluation_id)
            .ok_or_else(|| StoreError::NotFound(evaluation_id.to_string()))?;
        if eval.status.is_terminal() || eval.status == status {
            return Ok(false);
        }
        eval.status = status;
        eval.updated_at = at;
        Ok(true)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        *self.guard = self.staged;
        Ok(())
    }
}

#[async_trait]
impl MetaStore for MemStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.inner.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemTx { guard, staged }))
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.inner.lock().await.runs.get(run_id).cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>, StoreError> {
        let state = self.inner.lock().await;
        let mut runs: Vec<_> = state.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn current_status(&self, run_id: &str) -> Result<Option<RunStatus>, StoreError> {
        Ok(self.inner.lock().await.current_status(run_id))
    }

    async fn state_events(&self, run_id: &str) -> Result<Vec<RunStateEvent>, StoreError> {
        Ok(self.inner.lock().await.ordered_state_events(run_id))
    }

    async fn execution_for_run(&self, run_id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self.inner.lock().await.executions.get(run_id).cloned())
    }

    async fn ledger_for_run(&self, run_id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.inner.lock().await.ledger.get(run_id).cloned())
    }

    async fn list_ledger_entries(&self, limit: usize) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.inner.lock().await;
        let mut entries: Vec<_> = state.ledger.values().cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn decisions_for_run(&self, run_id: &str) -> Result<Vec<PolicyDecision>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .decisions
            .iter()
            .filter(|d| d.run_id.as_deref() == Some(run_id))
            .cloned()
            .collect())
    }

    async fn approvals_for_run(&self, run_id: &str) -> Result<Vec<Approval>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .approvals
            .values()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn get_approval(&self, approval_id: &str) -> Result<Option<Approval>, StoreError> {
        Ok(self.inner.lock().await.approvals.get(approval_id).cloned())
    }

    async fn pending_approvals(&self, limit: usize) -> Result<Vec<Approval>, StoreError> {
        let state = self.inner.lock().await;
        let mut pending: Vec<_> = state
            .approvals
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn metrics_for_run(&self, run_id: &str) -> Result<Vec<MetricSample>, StoreError> {
        let state = self.inner.lock().await;
        let mut samples: Vec<_> = state
            .metrics
            .values()
            .filter(|m| m.run_id == run_id)
            .cloned()
            .collect();
        samples.sort_by(|a, b| (a.step, &a.name).cmp(&(b.step, &b.name)));
        Ok(samples)
    }

    async fn run_events(
        &self,
        run_id: &str,
        after: Option<u64>,
    ) -> Result<Vec<RunEvent>, StoreError> {
        let state = self.inner.lock().await;
        let after = after.unwrap_or(0);
        Ok(state
            .run_events
            .get(run_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.event_id > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn artifacts_for_run(&self, run_id: &str) -> Result<Vec<Artifact>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .artifacts
            .iter()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn lineage_touching(&self, id: &str) -> Result<Vec<LineageEvent>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .lineage
            .iter()
            .filter(|e| e.subject_id == id || e.object_id == id)
            .cloned()
            .collect())
    }

    async fn audit_for_resources(
        &self,
        resource_ids: &[String],
    ) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .audit
            .iter()
            .filter(|e| resource_ids.iter().any(|id| *id == e.resource_id))
            .cloned()
            .collect())
    }

    async fn active_policy_versions(&self) -> Result<Vec<PolicyVersion>, StoreError> {
        let state = self.inner.lock().await;
        let mut latest: BTreeMap<&str, &PolicyVersion> = BTreeMap::new();
        for v in state
            .policy_versions
            .iter()
            .filter(|v| v.status == PolicyVersionStatus::Active)
        {
            match latest.get(v.policy_id.as_str()) {
                Some(existing) if existing.version >= v.version => {}
                _ => {
                    latest.insert(v.policy_id.as_str(), v);
                }
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn policy_version(
        &self,
        policy_version_id: &str,
    ) -> Result<Option<PolicyVersion>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .policy_versions
            .iter()
            .find(|v| v.policy_version_id == policy_version_id)
            .cloned())
    }

    async fn list_policy_versions(&self) -> Result<Vec<PolicyVersion>, StoreError> {
        Ok(self.inner.lock().await.policy_versions.clone())
    }

    async fn attestation_for_digest(
        &self,
        image_digest: &str,
    ) -> Result<Option<ImageAttestation>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .attestations
            .iter()
            .filter(|a| a.image_digest == image_digest)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn evidence_bundles_for_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<EvidenceBundle>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .bundles
            .iter()
            .filter(|b| b.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn executions_to_reconcile(
        &self,
        kind: ExecutorKind,
        batch: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let state = self.inner.lock().await;
        let mut executions: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.executor == kind)
            .filter(|e| {
                !state
                    .current_status(&e.run_id)
                    .map(|s| s.is_terminal())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        executions.truncate(batch);
        Ok(executions)
    }

    async fn runs_ready_for_evaluation(&self, batch: usize) -> Result<Vec<Run>, StoreError> {
        let state = self.inner.lock().await;
        let mut runs: Vec<_> = state
            .runs
            .values()
            .filter(|r| state.current_status(&r.run_id) == Some(RunStatus::Succeeded))
            .filter(|r| {
                state
                    .artifacts
                    .iter()
                    .any(|a| a.run_id == r.run_id && a.kind == ArtifactKind::Model)
            })
            .filter(|r| !state.evaluations.contains_key(&r.run_id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        runs.truncate(batch);
        Ok(runs)
    }

    async fn evaluation_for_run(&self, run_id: &str) -> Result<Option<Evaluation>, StoreError> {
        Ok(self.inner.lock().await.evaluations.get(run_id).cloned())
    }

    async fn evaluations_to_reconcile(
        &self,
        kind: ExecutorKind,
        batch: usize,
    ) -> Result<Vec<Evaluation>, StoreError> {
        let state = self.inner.lock().await;
        let mut evaluations: Vec<_> = state
            .evaluations
            .values()
            .filter(|e| e.executor == kind && !e.status.is_terminal())
            .cloned()
            .collect();
        evaluations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        evaluations.truncate(batch);
        Ok(evaluations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animus_types::codec;
    use animus_types::ids;
    use serde_json::json;

    fn run(run_id: &str) -> Run {
        Run {
            run_id: run_id.to_string(),
            experiment_id: "exp_1".into(),
            dataset_version_id: "dv_1".into(),
            git_repo: "acme/train".into(),
            git_commit: "0123abc".into(),
            git_ref: None,
            image_ref: "ghcr.io/acme/train@sha256:aa".into(),
            image_digest: "sha256:aa".into(),
            params: json!({}),
            resources: Default::default(),
            artifacts_prefix: "runs/r1".into(),
            created_by: "u1".into(),
            created_at: Utc::now(),
            integrity_sha256: "x".into(),
        }
    }

    fn state_event(run_id: &str, status: RunStatus, at: DateTime<Utc>) -> RunStateEvent {
        RunStateEvent {
            state_id: ids::new_id("rse"),
            run_id: run_id.to_string(),
            status,
            observed_at: at,
            details: None,
            integrity_sha256: "x".into(),
        }
    }

    #[tokio::test]
    async fn state_events_are_unique_per_status() {
        let store = MemStore::new();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        assert!(tx
            .append_state_event(state_event("r1", RunStatus::Succeeded, now))
            .await
            .unwrap());
        assert!(!tx
            .append_state_event(state_event("r1", RunStatus::Succeeded, now))
            .await
            .unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx
            .append_state_event(state_event("r1", RunStatus::Succeeded, now))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn current_status_follows_observed_at_then_state_id() {
        let store = MemStore::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);

        let mut tx = store.begin().await.unwrap();
        tx.append_state_event(state_event("r1", RunStatus::Pending, t0))
            .await
            .unwrap();
        tx.append_state_event(state_event("r1", RunStatus::Running, t1))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            store.current_status("r1").await.unwrap(),
            Some(RunStatus::Running)
        );
        let events = store.state_events("r1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn uncommitted_transactions_leave_no_trace() {
        let store = MemStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_run(run("r1")).await.unwrap();
            // dropped without commit
        }
        assert!(store.get_run("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_insert_is_first_writer_wins() {
        let store = MemStore::new();
        let exec = Execution {
            execution_id: "ex_1".into(),
            run_id: "r1".into(),
            executor: ExecutorKind::Docker,
            image_ref: "ghcr.io/a@sha256:aa".into(),
            image_digest: "sha256:aa".into(),
            resources: Default::default(),
            executor_handle: animus_types::execution::ExecutorHandle::Docker {
                container_name: "animus-run-r1".into(),
            },
            datapilot_url: "http://dp".into(),
            run_token_sha256: "t".into(),
            created_at: Utc::now(),
            integrity_sha256: "x".into(),
        };

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_execution(exec.clone()).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.insert_execution(exec).await.unwrap());
    }

    #[tokio::test]
    async fn metric_samples_are_idempotent_per_step() {
        let store = MemStore::new();
        let sample = MetricSample {
            sample_id: "s1".into(),
            run_id: "r1".into(),
            step: 3,
            name: "loss".into(),
            value: 0.5,
            metadata: None,
            created_at: Utc::now(),
        };

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_metric_sample(sample.clone()).await.unwrap());
        assert!(!tx.insert_metric_sample(sample).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.metrics_for_run("r1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_event_ids_are_monotonic_per_run() {
        let store = MemStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = tx
            .append_run_event("r1", EventLevel::Info, "started", Utc::now())
            .await
            .unwrap();
        let second = tx
            .append_run_event("r1", EventLevel::Error, "boom", Utc::now())
            .await
            .unwrap();
        let other = tx
            .append_run_event("r2", EventLevel::Info, "started", Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.event_id, 1);
        assert_eq!(second.event_id, 2);
        assert_eq!(other.event_id, 1);
    }

    #[tokio::test]
    async fn active_policy_versions_pick_latest_per_policy() {
        let store = MemStore::new();
        let version = |policy_id: &str, version: u32, status| PolicyVersion {
            policy_version_id: format!("{policy_id}_v{version}"),
            policy_id: policy_id.to_string(),
            version,
            status,
            spec: Default::default(),
            spec_sha256: "x".into(),
            created_at: Utc::now(),
            integrity_sha256: "x".into(),
        };

        let mut tx = store.begin().await.unwrap();
        tx.upsert_policy_version(version("p1", 1, PolicyVersionStatus::Active))
            .await
            .unwrap();
        tx.upsert_policy_version(version("p1", 2, PolicyVersionStatus::Active))
            .await
            .unwrap();
        tx.upsert_policy_version(version("p2", 1, PolicyVersionStatus::Retired))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let active = store.active_policy_versions().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].policy_version_id, "p1_v2");
    }

    #[tokio::test]
    async fn reconcile_batch_skips_terminal_runs() {
        let store = MemStore::new();
        let exec = |run_id: &str| Execution {
            execution_id: format!("ex_{run_id}"),
            run_id: run_id.to_string(),
            executor: ExecutorKind::Docker,
            image_ref: "ghcr.io/a@sha256:aa".into(),
            image_digest: "sha256:aa".into(),
            resources: Default::default(),
            executor_handle: animus_types::execution::ExecutorHandle::Docker {
                container_name: format!("animus-run-{run_id}"),
            },
            datapilot_url: "http://dp".into(),
            run_token_sha256: "t".into(),
            created_at: Utc::now(),
            integrity_sha256: "x".into(),
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_execution(exec("r1")).await.unwrap();
        tx.insert_execution(exec("r2")).await.unwrap();
        tx.append_state_event(state_event("r2", RunStatus::Succeeded, Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let batch = store
            .executions_to_reconcile(ExecutorKind::Docker, 10)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].run_id, "r1");
    }

    #[tokio::test]
    async fn integrity_hash_helper_is_usable_on_entities() {
        // Guards that entities stay serializable for hashing.
        let r = run("r9");
        assert_eq!(codec::integrity_sha256(&r).unwrap().len(), 64);
    }
}
