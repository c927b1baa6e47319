//! Router-level tests: status codes, the error envelope and the thin
//! adapter behaviour over the core operations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt as _;
use tower::ServiceExt as _;

use animus_api::executor::{Executor, ExecutorError, JobSpec, Observation, ObservedStatus};
use animus_api::gate::{DatasetGate, GateError};
use animus_gateway::router;
use animus_services::report::PlainReportRenderer;
use animus_services::{Core, ExecutorRegistry};
use animus_storage::{MemObjectStore, MemStore};
use animus_types::config::{NodeConfig, TrainingExecutor};
use animus_types::dataset::DatasetVersion;
use animus_types::execution::{Execution, ExecutorKind};

const DIGEST: &str = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

struct StaticExecutor;

#[async_trait]
impl Executor for StaticExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Docker
    }
    async fn resolve_image_id(&self, image_ref: &str) -> Result<String, ExecutorError> {
        Err(ExecutorError::ImageNotFound(image_ref.to_string()))
    }
    async fn submit(&self, _spec: &JobSpec) -> Result<(), ExecutorError> {
        Ok(())
    }
    async fn inspect(&self, _execution: &Execution) -> Result<Observation, ExecutorError> {
        Ok(Observation {
            status: ObservedStatus::Running,
            message: None,
            details: None,
        })
    }
}

struct StaticGate(HashMap<String, DatasetVersion>);

#[async_trait]
impl DatasetGate for StaticGate {
    async fn dataset_version(
        &self,
        dataset_version_id: &str,
    ) -> Result<Option<DatasetVersion>, GateError> {
        Ok(self.0.get(dataset_version_id).cloned())
    }
}

fn test_core() -> Core {
    let mut config = NodeConfig {
        training_executor: TrainingExecutor::Docker,
        ..NodeConfig::default()
    };
    config.run_token_secret = Some("run-secret".into());
    config.evidence_signing_secret = Some("evidence-secret".into());
    config.ci_webhook_secret = Some("ci-secret".into());
    config.datapilot_url = Some("http://datapilot.local".into());

    let dataset = DatasetVersion {
        dataset_id: "ds_1".into(),
        dataset_version_id: "dv_1".into(),
        sha256: "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef".into(),
        quality: "pass".into(),
    };

    Core {
        store: Arc::new(MemStore::new()),
        objects: Arc::new(MemObjectStore::new()),
        gate: Arc::new(StaticGate(
            [("dv_1".to_string(), dataset)].into_iter().collect(),
        )),
        renderer: Arc::new(PlainReportRenderer),
        executors: ExecutorRegistry::new().register(Arc::new(StaticExecutor)),
        config: Arc::new(config),
    }
}

fn submit_body(image_ref: &str) -> String {
    serde_json::json!({
        "experiment_id": "exp_1",
        "dataset_version_id": "dv_1",
        "git_repo": "acme/train",
        "git_commit": "0123456789abcdef0123456789abcdef01234567",
        "image_ref": image_ref,
    })
    .to_string()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn submit_returns_201_with_run_and_status() {
    let app = router(Arc::new(test_core()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/runs")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-animus-subject", "alice")
        .body(Body::from(submit_body(&format!("ghcr.io/acme/train@{DIGEST}"))))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "running");
    assert_eq!(json["run"]["image_digest"], DIGEST);
    assert_eq!(json["run"]["created_by"], "alice");
}

#[tokio::test]
async fn unknown_run_yields_the_error_envelope() {
    let app = router(Arc::new(test_core()));
    let request = Request::builder()
        .uri("/api/v1/runs/run_missing")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["request_id"], "req-42");
}

#[tokio::test]
async fn unpinned_image_is_rejected_with_stable_code() {
    let app = router(Arc::new(test_core()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/runs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(submit_body("ghcr.io/acme/train:latest")))
        .unwrap();

    // The static executor cannot resolve tags, so docker reports not found.
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "image_ref_not_found");
}

#[tokio::test]
async fn api_token_gates_non_ingest_routes() {
    let mut core = test_core();
    let mut config = (*core.config).clone();
    config.api_token = Some("deploy-token".into());
    core.config = Arc::new(config);
    let app = router(Arc::new(core));

    let unauthorized = Request::builder()
        .uri("/api/v1/runs")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(unauthorized).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "unauthorized");

    let authorized = Request::builder()
        .uri("/api/v1/runs")
        .header(header::AUTHORIZATION, "Bearer deploy-token")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(authorized).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn policy_upsert_requires_admin() {
    let app = router(Arc::new(test_core()));
    let body = serde_json::json!({
        "version": 1,
        "status": "active",
        "spec": {"default_effect": "allow", "rules": []},
    })
    .to_string();

    let request = |roles: &str| {
        Request::builder()
            .method("PUT")
            .uri("/api/v1/policies/gpu_policy")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-animus-subject", "carol")
            .header("x-animus-roles", roles)
            .body(Body::from(body.clone()))
            .unwrap()
    };

    let response = app.clone().oneshot(request("researcher")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(request("admin")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["policy_id"], "gpu_policy");
    assert_eq!(json["status"], "active");
}

#[tokio::test]
async fn approval_flow_over_http() {
    let core = Arc::new(test_core());
    let app = router(core.clone());

    // Install a require-approval policy as an admin.
    let policy_body = serde_json::json!({
        "version": 1,
        "status": "active",
        "spec": {
            "default_effect": "allow",
            "rules": [{"rule_id": "human_gate", "effect": "require_approval", "match": {}}],
        },
    })
    .to_string();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/policies/human")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-animus-subject", "root")
                .header("x-animus-roles", "admin")
                .body(Body::from(policy_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Submission parks in pending with a 202.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/runs")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-animus-subject", "alice")
                .body(Body::from(submit_body(&format!("ghcr.io/acme/train@{DIGEST}"))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    let approval_id = json["approvals"][0]["approval_id"].as_str().unwrap().to_string();

    // Requester cannot approve their own run.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/approvals/{approval_id}/approve"))
                .header("x-animus-subject", "alice")
                .header("x-animus-roles", "admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await["error"],
        "approval_requires_second_reviewer"
    );

    // A second admin approves; the continuation drives the run to running.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/approvals/{approval_id}/approve"))
                .header("x-animus-subject", "bob")
                .header("x-animus-roles", "admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["run_status"], "running");

    // Resolving again conflicts.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/approvals/{approval_id}/deny"))
                .header("x-animus-subject", "bob")
                .header("x-animus-roles", "admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "approval_not_pending");
}

#[tokio::test]
async fn ci_webhook_rejects_bad_signatures() {
    let app = router(Arc::new(test_core()));
    let body = serde_json::json!({
        "image_digest": DIGEST,
        "git_repo": "acme/train",
        "git_commit": "0123456789abcdef0123456789abcdef01234567",
    })
    .to_string();

    let ts = chrono::Utc::now().timestamp().to_string();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/ci")
                .header("x-animus-ci-ts", &ts)
                .header("x-animus-ci-sig", "not-a-signature")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let sig = animus_services::auth::sign_webhook("ci-secret", &ts, "POST", body.as_bytes()).unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/ci")
                .header("x-animus-ci-ts", &ts)
                .header("x-animus-ci-sig", &sig)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn malformed_json_surfaces_invalid_json() {
    let app = router(Arc::new(test_core()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/runs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_json");
}

#[tokio::test]
async fn healthz_is_open() {
    let app = router(Arc::new(test_core()));
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
