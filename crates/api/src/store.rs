//! The relational store port.
//!
//! The relational store is the single source of truth. This port encodes
//! the concurrency contract the core relies on, so that any backend —
//! the bundled in-memory store or a SQL database — provides the same
//! guarantees:
//!
//! * `append_state_event` is unique on `(run_id, status)` and reports
//!   whether a new row was written. Concurrent writers of the same
//!   transition observe exactly one `true`.
//! * `insert_execution` / `insert_ledger_entry` / `insert_evaluation` are
//!   first-writer-wins on `run_id` (the `ON CONFLICT DO NOTHING` shape);
//!   `false` means another writer got there first.
//! * `insert_metric_sample` is first-writer-wins on `(run_id, name, step)`.
//! * A [`StoreTx`] is atomic: either every buffered write commits or none
//!   do. `get_approval` inside a transaction locks the row for update —
//!   concurrent resolvers of the same approval serialize.
//!
//! Audit and lineage events are written through the same transaction as
//! the domain change they describe; a failed audit write fails the
//! transaction.

use async_trait::async_trait;

use animus_types::audit::{AuditEvent, LineageEvent};
use animus_types::error::StoreError;
use animus_types::evidence::EvidenceBundle;
use animus_types::execution::{Evaluation, Execution, ExecutorKind};
use animus_types::ledger::LedgerEntry;
use animus_types::policy::{Approval, PolicyDecision, PolicyVersion};
use animus_types::run::{
    Artifact, EventLevel, MetricSample, Run, RunEvent, RunStateEvent, RunStatus,
};
use animus_types::scm::ImageAttestation;
use chrono::{DateTime, Utc};

/// One atomic unit of work against the store.
#[async_trait]
pub trait StoreTx: Send {
    // --- reads that participate in the transaction ---

    async fn get_run(&mut self, run_id: &str) -> Result<Option<Run>, StoreError>;
    async fn current_status(&mut self, run_id: &str) -> Result<Option<RunStatus>, StoreError>;
    async fn execution_for_run(&mut self, run_id: &str)
        -> Result<Option<Execution>, StoreError>;
    async fn ledger_for_run(&mut self, run_id: &str) -> Result<Option<LedgerEntry>, StoreError>;
    /// Reads an approval with the row locked for update until commit.
    async fn get_approval(&mut self, approval_id: &str) -> Result<Option<Approval>, StoreError>;
    async fn approvals_for_run(&mut self, run_id: &str) -> Result<Vec<Approval>, StoreError>;

    // --- writes ---

    async fn insert_run(&mut self, run: Run) -> Result<(), StoreError>;
    /// Appends a state event; `false` when `(run_id, status)` already exists.
    async fn append_state_event(&mut self, event: RunStateEvent) -> Result<bool, StoreError>;
    /// Materializes an execution; `false` when the run already has one.
    async fn insert_execution(&mut self, execution: Execution) -> Result<bool, StoreError>;
    /// Writes the ledger row; `false` when the run already has one.
    async fn insert_ledger_entry(&mut self, entry: LedgerEntry) -> Result<bool, StoreError>;
    async fn insert_decision(&mut self, decision: PolicyDecision) -> Result<(), StoreError>;
    async fn insert_approval(&mut self, approval: Approval) -> Result<(), StoreError>;
    /// Replaces an approval row previously read in this transaction.
    async fn update_approval(&mut self, approval: Approval) -> Result<(), StoreError>;
    /// Inserts one metric sample; `false` when `(run_id, name, step)` exists.
    async fn insert_metric_sample(&mut self, sample: MetricSample) -> Result<bool, StoreError>;
    /// Appends a run log event, assigning the next per-run `event_id`.
    async fn append_run_event(
        &mut self,
        run_id: &str,
        level: EventLevel,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<RunEvent, StoreError>;
    async fn insert_audit_event(&mut self, event: AuditEvent) -> Result<(), StoreError>;
    async fn insert_lineage_event(&mut self, event: LineageEvent) -> Result<(), StoreError>;
    async fn insert_evidence_bundle(&mut self, bundle: EvidenceBundle) -> Result<(), StoreError>;
    async fn insert_artifact(&mut self, artifact: Artifact) -> Result<(), StoreError>;
    async fn upsert_policy_version(&mut self, version: PolicyVersion) -> Result<(), StoreError>;
    async fn insert_attestation(&mut self, attestation: ImageAttestation)
        -> Result<(), StoreError>;
    /// Schedules an evaluation; `false` when the run already has one.
    async fn insert_evaluation(&mut self, evaluation: Evaluation) -> Result<bool, StoreError>;
    /// Projects an observed evaluation status; `false` when the evaluation
    /// is already terminal or already carries the status.
    async fn update_evaluation_status(
        &mut self,
        evaluation_id: &str,
        status: RunStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Commits every buffered write atomically.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// The store itself: transaction factory plus read-only queries that do not
/// need transactional isolation.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, StoreError>;
    async fn list_runs(&self, limit: usize) -> Result<Vec<Run>, StoreError>;
    /// The status of the state event with maximum `(observed_at, state_id)`,
    /// or `None` for a run with no events yet.
    async fn current_status(&self, run_id: &str) -> Result<Option<RunStatus>, StoreError>;
    /// All state events for a run, ordered by `(observed_at, state_id)`.
    async fn state_events(&self, run_id: &str) -> Result<Vec<RunStateEvent>, StoreError>;
    async fn execution_for_run(&self, run_id: &str) -> Result<Option<Execution>, StoreError>;
    async fn ledger_for_run(&self, run_id: &str) -> Result<Option<LedgerEntry>, StoreError>;
    async fn list_ledger_entries(&self, limit: usize) -> Result<Vec<LedgerEntry>, StoreError>;
    async fn decisions_for_run(&self, run_id: &str) -> Result<Vec<PolicyDecision>, StoreError>;
    async fn approvals_for_run(&self, run_id: &str) -> Result<Vec<Approval>, StoreError>;
    async fn get_approval(&self, approval_id: &str) -> Result<Option<Approval>, StoreError>;
    async fn pending_approvals(&self, limit: usize) -> Result<Vec<Approval>, StoreError>;
    async fn metrics_for_run(&self, run_id: &str) -> Result<Vec<MetricSample>, StoreError>;
    /// Run log events with `event_id` greater than `after`, in order.
    async fn run_events(
        &self,
        run_id: &str,
        after: Option<u64>,
    ) -> Result<Vec<RunEvent>, StoreError>;
    async fn artifacts_for_run(&self, run_id: &str) -> Result<Vec<Artifact>, StoreError>;
    /// Lineage events where the id appears as subject or object.
    async fn lineage_touching(&self, id: &str) -> Result<Vec<LineageEvent>, StoreError>;
    /// Audit events whose `resource_id` is in the given set.
    async fn audit_for_resources(
        &self,
        resource_ids: &[String],
    ) -> Result<Vec<AuditEvent>, StoreError>;
    /// The latest `active` version of every policy, one per `policy_id`.
    async fn active_policy_versions(&self) -> Result<Vec<PolicyVersion>, StoreError>;
    async fn policy_version(
        &self,
        policy_version_id: &str,
    ) -> Result<Option<PolicyVersion>, StoreError>;
    async fn list_policy_versions(&self) -> Result<Vec<PolicyVersion>, StoreError>;
    /// The most recent attestation for an image digest, if any.
    async fn attestation_for_digest(
        &self,
        image_digest: &str,
    ) -> Result<Option<ImageAttestation>, StoreError>;
    async fn evidence_bundles_for_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<EvidenceBundle>, StoreError>;
    /// Executions of the given kind whose run has no terminal state event,
    /// ordered by `created_at`, capped at `batch`.
    async fn executions_to_reconcile(
        &self,
        kind: ExecutorKind,
        batch: usize,
    ) -> Result<Vec<Execution>, StoreError>;
    /// Runs that reached `succeeded`, registered a model artifact, and have
    /// no evaluation yet.
    async fn runs_ready_for_evaluation(&self, batch: usize) -> Result<Vec<Run>, StoreError>;
    async fn evaluation_for_run(&self, run_id: &str) -> Result<Option<Evaluation>, StoreError>;
    /// Evaluations of the given kind that are not yet terminal.
    async fn evaluations_to_reconcile(
        &self,
        kind: ExecutorKind,
        batch: usize,
    ) -> Result<Vec<Evaluation>, StoreError>;
}
