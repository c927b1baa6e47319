//! Shared harness for the governance engine integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use animus_api::executor::{Executor, ExecutorError, JobSpec, Observation, ObservedStatus};
use animus_api::gate::{DatasetGate, GateError};
use animus_services::report::PlainReportRenderer;
use animus_services::{Core, ExecutorRegistry};
use animus_storage::{MemObjectStore, MemStore};
use animus_types::config::{NodeConfig, TrainingExecutor};
use animus_types::dataset::DatasetVersion;
use animus_types::execution::{Execution, ExecutorKind};

pub const RUN_TOKEN_SECRET: &str = "run-token-secret";
pub const EVIDENCE_SECRET: &str = "evidence-secret";
pub const CI_SECRET: &str = "ci-secret";
pub const DIGEST_A: &str =
    "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const DIGEST_B: &str =
    "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

/// A scripted executor: records submissions, resolves digests from a fixed
/// map, and replays a queue of observations (pending once drained).
pub struct FakeExecutor {
    kind: ExecutorKind,
    digests: HashMap<String, String>,
    pub submitted: Mutex<Vec<JobSpec>>,
    pub submit_error: Mutex<Option<String>>,
    observations: Mutex<VecDeque<Observation>>,
}

impl FakeExecutor {
    pub fn new(kind: ExecutorKind) -> Self {
        Self {
            kind,
            digests: HashMap::new(),
            submitted: Mutex::new(Vec::new()),
            submit_error: Mutex::new(None),
            observations: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_digest(mut self, image_ref: &str, digest: &str) -> Self {
        self.digests.insert(image_ref.to_string(), digest.to_string());
        self
    }

    pub async fn fail_next_submit(&self, message: &str) {
        *self.submit_error.lock().await = Some(message.to_string());
    }

    pub async fn push_observation(&self, status: ObservedStatus) {
        self.observations.lock().await.push_back(Observation {
            status,
            message: None,
            details: None,
        });
    }

    pub async fn submitted_count(&self) -> usize {
        self.submitted.lock().await.len()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    async fn resolve_image_id(&self, image_ref: &str) -> Result<String, ExecutorError> {
        self.digests
            .get(image_ref)
            .cloned()
            .ok_or_else(|| ExecutorError::ImageNotFound(image_ref.to_string()))
    }

    async fn submit(&self, spec: &JobSpec) -> Result<(), ExecutorError> {
        if let Some(message) = self.submit_error.lock().await.take() {
            return Err(ExecutorError::Submit(message));
        }
        let mut submitted = self.submitted.lock().await;
        // Idempotent: an identical handle is a no-op.
        if !submitted.iter().any(|s| s.handle == spec.handle) {
            submitted.push(spec.clone());
        }
        Ok(())
    }

    async fn inspect(&self, _execution: &Execution) -> Result<Observation, ExecutorError> {
        Ok(self
            .observations
            .lock()
            .await
            .pop_front()
            .unwrap_or(Observation {
                status: ObservedStatus::Pending,
                message: None,
                details: None,
            }))
    }
}

/// A gate serving a fixed set of dataset versions.
pub struct FakeGate {
    versions: HashMap<String, DatasetVersion>,
}

impl FakeGate {
    pub fn new(versions: Vec<DatasetVersion>) -> Self {
        Self {
            versions: versions
                .into_iter()
                .map(|v| (v.dataset_version_id.clone(), v))
                .collect(),
        }
    }
}

#[async_trait]
impl DatasetGate for FakeGate {
    async fn dataset_version(
        &self,
        dataset_version_id: &str,
    ) -> Result<Option<DatasetVersion>, GateError> {
        Ok(self.versions.get(dataset_version_id).cloned())
    }
}

pub fn passing_dataset(id: &str) -> DatasetVersion {
    DatasetVersion {
        dataset_id: "ds_1".into(),
        dataset_version_id: id.into(),
        sha256: "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef".into(),
        quality: "pass".into(),
    }
}

pub struct Harness {
    pub core: Core,
    pub store: MemStore,
    pub objects: MemObjectStore,
    pub executor: Arc<FakeExecutor>,
}

/// A fully wired core against in-memory stores and a scripted docker
/// executor that knows `ghcr.io/acme/train:latest`.
pub fn harness() -> Harness {
    harness_with_executor(
        FakeExecutor::new(ExecutorKind::Docker).with_digest("ghcr.io/acme/train:latest", DIGEST_B),
    )
}

pub fn harness_with_executor(executor: FakeExecutor) -> Harness {
    let store = MemStore::new();
    let objects = MemObjectStore::new();
    let executor = Arc::new(executor);

    let mut config = NodeConfig {
        training_executor: match executor.kind() {
            ExecutorKind::Docker => TrainingExecutor::Docker,
            ExecutorKind::KubernetesJob => TrainingExecutor::KubernetesJob,
        },
        ..NodeConfig::default()
    };
    config.training_namespace = Some("ml".into());
    config.run_token_secret = Some(RUN_TOKEN_SECRET.into());
    config.evidence_signing_secret = Some(EVIDENCE_SECRET.into());
    config.ci_webhook_secret = Some(CI_SECRET.into());
    config.datapilot_url = Some("http://datapilot.local".into());

    let core = Core {
        store: Arc::new(store.clone()),
        objects: Arc::new(objects.clone()),
        gate: Arc::new(FakeGate::new(vec![
            passing_dataset("dv_1"),
            DatasetVersion {
                dataset_id: "ds_2".into(),
                dataset_version_id: "dv_failing".into(),
                sha256: "cafecafecafecafecafecafecafecafecafecafecafecafecafecafecafecafe".into(),
                quality: "fail".into(),
            },
        ])),
        renderer: Arc::new(PlainReportRenderer),
        executors: ExecutorRegistry::new().register(executor.clone()),
        config: Arc::new(config),
    };

    Harness {
        core,
        store,
        objects,
        executor,
    }
}

/// Installs an active policy version with the given spec.
pub async fn install_policy(
    store: &MemStore,
    policy_id: &str,
    spec: animus_types::policy::PolicySpec,
) {
    use animus_api::store::MetaStore;
    use animus_types::policy::{PolicyVersion, PolicyVersionStatus};

    let version = PolicyVersion {
        policy_version_id: format!("{policy_id}_v1"),
        policy_id: policy_id.to_string(),
        version: 1,
        status: PolicyVersionStatus::Active,
        spec_sha256: animus_services::policy::spec_sha256(&spec).unwrap(),
        spec,
        created_at: chrono::Utc::now(),
        integrity_sha256: String::new(),
    };
    let mut tx = store.begin().await.unwrap();
    tx.upsert_policy_version(version).await.unwrap();
    tx.commit().await.unwrap();
}

/// A standard pinned-image submission request.
pub fn submit_request(image_ref: &str) -> animus_services::orchestrator::SubmitRunRequest {
    animus_services::orchestrator::SubmitRunRequest {
        experiment_id: "exp_1".into(),
        dataset_version_id: "dv_1".into(),
        git_repo: "acme/train".into(),
        git_commit: "0123456789abcdef0123456789abcdef01234567".into(),
        git_ref: Some("refs/heads/main".into()),
        image_ref: image_ref.into(),
        params: Some(serde_json::json!({"lr": 0.01})),
        resources: Default::default(),
        artifacts_prefix: None,
    }
}
