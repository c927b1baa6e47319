//! End-to-end governance scenarios: allow, deny, two-reviewer approval,
//! image pinning and webhook attestations.

mod support;

use animus_api::identity::Actor;
use animus_api::store::MetaStore;
use animus_services::approvals::{self, ResolveAction};
use animus_services::{auth, ingest, orchestrator, scm};
use animus_types::codec;
use animus_types::error::ErrorCode;
use animus_types::execution::ExecutorKind;
use animus_types::policy::{
    ApprovalStatus, DecisionEffect, PolicyRule, PolicySpec, RuleMatch,
};
use animus_types::run::RunStatus;

use support::*;

fn researcher() -> Actor {
    Actor::new("alice").with_roles(&["researcher"])
}

fn pinned_ref() -> String {
    format!("ghcr.io/acme/train@{DIGEST_A}")
}

fn require_approval_policy() -> PolicySpec {
    PolicySpec {
        default_effect: DecisionEffect::Allow,
        rules: vec![PolicyRule {
            rule_id: "human_gate".into(),
            effect: DecisionEffect::RequireApproval,
            reason: Some("all runs need a reviewer".into()),
            matcher: RuleMatch::default(),
        }],
    }
}

#[tokio::test]
async fn allow_path_runs_to_running_with_ledger() {
    let h = harness();

    let outcome = orchestrator::submit(&h.core, &researcher(), submit_request(&pinned_ref()))
        .await
        .unwrap();
    let run = match outcome {
        orchestrator::SubmitOutcome::Started { run, status } => {
            assert_eq!(status, RunStatus::Running);
            run
        }
        other => panic!("expected Started, got {other:?}"),
    };

    // State sequence pending -> running.
    let events = h.store.state_events(&run.run_id).await.unwrap();
    let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![RunStatus::Pending, RunStatus::Running]);

    // Exactly one submission reached the executor.
    assert_eq!(h.executor.submitted_count().await, 1);
    let submitted = h.executor.submitted.lock().await;
    assert_eq!(submitted[0].image_execution_ref, pinned_ref());
    assert!(submitted[0].run_token.starts_with("animus_run_v1."));
    drop(submitted);

    // Ledger row with the canonical replay-bundle hash.
    let entry = h.store.ledger_for_run(&run.run_id).await.unwrap().unwrap();
    assert_eq!(
        entry.execution_hash,
        codec::integrity_sha256(&entry.replay_bundle).unwrap()
    );
    assert_eq!(entry.entry["image"]["digest"], DIGEST_A);

    // Execution row is pinned and unique.
    let execution = h.store.execution_for_run(&run.run_id).await.unwrap().unwrap();
    assert_eq!(execution.image_digest, DIGEST_A);

    // The audit trail covers submission and execution.
    let audits = h
        .store
        .audit_for_resources(&[run.run_id.clone(), execution.execution_id.clone()])
        .await
        .unwrap();
    let actions: Vec<_> = audits.iter().map(|a| a.action.as_str()).collect();
    assert!(actions.contains(&"experiment_run.submit"));
    assert!(actions.contains(&"experiment_run.execute"));
    assert!(actions.contains(&"experiment_run.running"));
}

#[tokio::test]
async fn deny_path_persists_decision_but_no_execution() {
    let h = harness();
    install_policy(
        &h.store,
        "gpu_policy",
        PolicySpec {
            default_effect: DecisionEffect::Allow,
            rules: vec![PolicyRule {
                rule_id: "gpu_cap".into(),
                effect: DecisionEffect::Deny,
                reason: Some("gpu request above cap".into()),
                matcher: RuleMatch {
                    gpus_above: Some(8),
                    ..Default::default()
                },
            }],
        },
    )
    .await;

    let mut request = submit_request(&pinned_ref());
    request.resources.gpu_count = 16;
    let err = orchestrator::submit(&h.core, &researcher(), request)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "policy_denied");

    let runs = h.store.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    let run_id = &runs[0].run_id;

    let decisions = h.store.decisions_for_run(run_id).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision, DecisionEffect::Deny);
    assert_eq!(decisions[0].rule_id.as_deref(), Some("gpu_cap"));

    assert!(h.store.execution_for_run(run_id).await.unwrap().is_none());
    assert!(h.store.ledger_for_run(run_id).await.unwrap().is_none());
    assert_eq!(h.executor.submitted_count().await, 0);
    assert_eq!(
        h.store.current_status(run_id).await.unwrap(),
        Some(RunStatus::Canceled)
    );
}

#[tokio::test]
async fn two_reviewer_approval_protocol() {
    let h = harness();
    install_policy(&h.store, "human", require_approval_policy()).await;

    let outcome = orchestrator::submit(&h.core, &researcher(), submit_request(&pinned_ref()))
        .await
        .unwrap();
    let (run, approvals) = match outcome {
        orchestrator::SubmitOutcome::ApprovalRequired { run, approvals, .. } => (run, approvals),
        other => panic!("expected ApprovalRequired, got {other:?}"),
    };
    assert_eq!(approvals.len(), 1);
    assert_eq!(
        h.store.current_status(&run.run_id).await.unwrap(),
        Some(RunStatus::Pending)
    );
    assert_eq!(h.executor.submitted_count().await, 0);

    let approval_id = &approvals[0].approval_id;

    // Requester cannot resolve their own approval, even as admin.
    let requester_admin = Actor::new("alice").with_roles(&["admin"]);
    let err = approvals::resolve(&h.core, &requester_admin, approval_id, ResolveAction::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "approval_requires_second_reviewer");

    // Non-admin second reviewer is rejected.
    let reviewer = Actor::new("bob").with_roles(&["researcher"]);
    let err = approvals::resolve(&h.core, &reviewer, approval_id, ResolveAction::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "approval_requires_admin");

    // A different admin denies: run is canceled with policy_denied.
    let admin = Actor::new("bob").with_roles(&["admin"]);
    let outcome = approvals::resolve(
        &h.core,
        &admin,
        approval_id,
        ResolveAction::Deny,
        Some("not on a friday".into()),
    )
    .await
    .unwrap();
    assert_eq!(outcome.approval.status, ApprovalStatus::Denied);
    assert_eq!(outcome.run_status, Some(RunStatus::Canceled));

    let events = h.store.state_events(&run.run_id).await.unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.status, RunStatus::Canceled);
    assert_eq!(last.details.as_ref().unwrap()["reason"], "policy_denied");

    // Re-resolution hits the exactly-once guard.
    let err = approvals::resolve(&h.core, &admin, approval_id, ResolveAction::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "approval_not_pending");
}

#[tokio::test]
async fn full_approval_runs_the_continuation() {
    let h = harness();
    install_policy(&h.store, "human", require_approval_policy()).await;

    let outcome = orchestrator::submit(&h.core, &researcher(), submit_request(&pinned_ref()))
        .await
        .unwrap();
    let (run, approvals) = match outcome {
        orchestrator::SubmitOutcome::ApprovalRequired { run, approvals, .. } => (run, approvals),
        other => panic!("expected ApprovalRequired, got {other:?}"),
    };

    let admin = Actor::new("bob").with_roles(&["admin"]);
    let outcome = approvals::resolve(
        &h.core,
        &admin,
        &approvals[0].approval_id,
        ResolveAction::Approve,
        None,
    )
    .await
    .unwrap();
    assert_eq!(outcome.run_status, Some(RunStatus::Running));
    assert!(outcome.conflict.is_none());

    // The continuation produced the same artifacts as the allow path.
    assert!(h.store.execution_for_run(&run.run_id).await.unwrap().is_some());
    let entry = h.store.ledger_for_run(&run.run_id).await.unwrap().unwrap();
    assert_eq!(entry.entry["approvals"].as_array().unwrap().len(), 1);
    assert_eq!(h.executor.submitted_count().await, 1);

    let statuses: Vec<_> = h
        .store
        .state_events(&run.run_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(statuses, vec![RunStatus::Pending, RunStatus::Running]);
}

#[tokio::test]
async fn submit_failure_compensates_to_failed() {
    let h = harness();
    h.executor.fail_next_submit("daemon unreachable").await;

    let err = orchestrator::submit(&h.core, &researcher(), submit_request(&pinned_ref()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "training_submit_failed");

    let runs = h.store.list_runs(10).await.unwrap();
    let run_id = &runs[0].run_id;
    let events = h.store.state_events(run_id).await.unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.status, RunStatus::Failed);
    assert_eq!(last.details.as_ref().unwrap()["reason"], "submit_failed");

    // Ledger and execution exist: the run was staged before launch failed.
    assert!(h.store.ledger_for_run(run_id).await.unwrap().is_some());
}

#[tokio::test]
async fn docker_resolves_unpinned_refs_k8s_rejects_them() {
    // Docker: tag resolved through the daemon; digest lands in the ledger.
    let h = harness();
    let outcome = orchestrator::submit(
        &h.core,
        &researcher(),
        submit_request("ghcr.io/acme/train:latest"),
    )
    .await
    .unwrap();
    let run = match outcome {
        orchestrator::SubmitOutcome::Started { run, .. } => run,
        other => panic!("expected Started, got {other:?}"),
    };
    assert_eq!(run.image_digest, DIGEST_B);
    let entry = h.store.ledger_for_run(&run.run_id).await.unwrap().unwrap();
    assert_eq!(entry.entry["image"]["digest"], DIGEST_B);

    // Kubernetes: the same unpinned ref is rejected outright.
    let h = harness_with_executor(FakeExecutor::new(ExecutorKind::KubernetesJob));
    let err = orchestrator::submit(
        &h.core,
        &researcher(),
        submit_request("ghcr.io/acme/train:latest"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "image_ref_digest_required");
}

#[tokio::test]
async fn quality_gate_blocks_submission() {
    let h = harness();
    let mut request = submit_request(&pinned_ref());
    request.dataset_version_id = "dv_failing".into();
    let err = orchestrator::submit(&h.core, &researcher(), request)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "quality_gate_failed");
    assert!(h.store.list_runs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn attestation_conflicts_block_submission() {
    let h = harness();

    // CI attests DIGEST_A against a different commit.
    let body = serde_json::json!({
        "image_digest": DIGEST_A,
        "git_repo": "acme/train",
        "git_commit": "ffffffffffffffffffffffffffffffffffffffff",
    })
    .to_string();
    let now = chrono::Utc::now();
    let ts = now.timestamp().to_string();
    let sig = auth::sign_webhook(CI_SECRET, &ts, "POST", body.as_bytes()).unwrap();
    scm::receive_attestation(&h.core, &ts, &sig, "POST", body.as_bytes(), now)
        .await
        .unwrap();

    let err = orchestrator::submit(&h.core, &researcher(), submit_request(&pinned_ref()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "git_commit_conflict");

    // A bad signature never reaches the store.
    let err = scm::receive_attestation(&h.core, &ts, "bogus", "POST", body.as_bytes(), now)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unauthorized");
}

#[tokio::test]
async fn dry_run_persists_nothing() {
    let h = harness();
    install_policy(&h.store, "human", require_approval_policy()).await;

    let response = orchestrator::dry_run(&h.core, &researcher(), submit_request(&pinned_ref()))
        .await
        .unwrap();
    assert_eq!(response.decision, DecisionEffect::RequireApproval);
    assert_eq!(response.state, RunStatus::Pending);
    assert!(response.plan_exists);
    assert_eq!(response.attempts_by_step.get("policy_eval"), Some(&1));

    assert!(h.store.list_runs(10).await.unwrap().is_empty());
    assert_eq!(h.executor.submitted_count().await, 0);
}

#[tokio::test]
async fn metric_ingestion_is_idempotent_and_token_gated() {
    let h = harness();
    let outcome = orchestrator::submit(&h.core, &researcher(), submit_request(&pinned_ref()))
        .await
        .unwrap();
    let run = match outcome {
        orchestrator::SubmitOutcome::Started { run, .. } => run,
        other => panic!("expected Started, got {other:?}"),
    };
    let token = h.executor.submitted.lock().await[0].run_token.clone();
    let now = chrono::Utc::now();

    let request = || ingest::MetricsRequest {
        step: 5,
        metrics: [
            ("loss".to_string(), serde_json::json!(0.42)),
            ("acc".to_string(), serde_json::json!(0.91)),
        ]
        .into_iter()
        .collect(),
    };

    let first = ingest::ingest_metrics_for_run(&h.core, &run.run_id, &token, request(), now)
        .await
        .unwrap();
    assert_eq!(first.received, 2);
    assert_eq!(first.inserted, 2);

    // Same step again: received but nothing new inserted.
    let second = ingest::ingest_metrics_for_run(&h.core, &run.run_id, &token, request(), now)
        .await
        .unwrap();
    assert_eq!(second.received, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(h.store.metrics_for_run(&run.run_id).await.unwrap().len(), 2);

    // Non-numeric value fails the whole request.
    let bad = ingest::MetricsRequest {
        step: 6,
        metrics: [("loss".to_string(), serde_json::json!("NaN"))]
            .into_iter()
            .collect(),
    };
    let err = ingest::ingest_metrics_for_run(&h.core, &run.run_id, &token, bad, now)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_metric_value");

    // A token for another run is rejected.
    let err = ingest::ingest_metrics_for_run(&h.core, "run_other", &token, request(), now)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unauthorized");

    // Events get monotonic ids.
    let events = ingest::ingest_events_for_run(
        &h.core,
        &run.run_id,
        &token,
        vec![
            ingest::EventLine {
                level: animus_types::run::EventLevel::Info,
                message: "epoch 1 done".into(),
            },
            ingest::EventLine {
                level: animus_types::run::EventLevel::Info,
                message: "epoch 2 done".into(),
            },
        ],
        now,
    )
    .await
    .unwrap();
    assert_eq!(events.appended, 2);
    assert_eq!(events.last_event_id, 2);
}
