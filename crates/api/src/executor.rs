//! The executor port: launch a container, observe it, resolve image refs.
//!
//! Executors are a capability set, not a hierarchy. An implementation
//! answers for exactly one [`ExecutorKind`]; the orchestrator and the
//! reconcilers only ever see the trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use animus_types::execution::{Execution, ExecutorHandle, ExecutorKind, JobKind, Resources};

/// Environment keys the control plane injects itself. A [`JobSpec`] whose
/// caller-supplied env collides with these is rejected before submission.
pub const RESERVED_ENV_KEYS: &[&str] = &[
    "ANIMUS_RUN_ID",
    "ANIMUS_RUN_TOKEN",
    "ANIMUS_DATASET_VERSION_ID",
    "ANIMUS_JOB_KIND",
    "DATAPILOT_URL",
];

/// Deterministic handle name for a run's training job.
pub fn training_handle_name(run_id: &str) -> String {
    format!("animus-run-{run_id}")
}

/// Deterministic handle name for a run's evaluation job.
pub fn evaluation_handle_name(run_id: &str) -> String {
    format!("animus-eval-{run_id}")
}

/// Everything an executor needs to launch a job. `image_execution_ref` is
/// always digest-pinned by the time a spec reaches an executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    pub run_id: String,
    pub dataset_version_id: String,
    pub image_execution_ref: String,
    pub datapilot_url: String,
    /// The run-scoped bearer token the container uses against the
    /// telemetry API.
    pub run_token: String,
    pub resources: Resources,
    pub job_kind: JobKind,
    pub handle: ExecutorHandle,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl JobSpec {
    /// Rejects caller-supplied env entries that collide with the keys the
    /// control plane injects.
    pub fn validate_env(&self) -> Result<(), ExecutorError> {
        for key in self.env.keys() {
            if RESERVED_ENV_KEYS.contains(&key.as_str()) {
                return Err(ExecutorError::ReservedEnvKey(key.clone()));
            }
        }
        Ok(())
    }
}

/// What an executor observed about a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObservedStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One inspection result. `details` carries backend-specific context
/// (exit codes, pod conditions) opaquely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub status: ObservedStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Errors from an executor backend.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The image reference could not be resolved to a digest.
    #[error("image reference not found: {0}")]
    ImageNotFound(String),
    /// A caller-supplied env key collides with a reserved key.
    #[error("reserved env key: {0}")]
    ReservedEnvKey(String),
    /// The backend rejected the submission.
    #[error("submit failed: {0}")]
    Submit(String),
    /// The backend failed while inspecting a job.
    #[error("inspect failed: {0}")]
    Inspect(String),
    /// The backend is unreachable or misbehaving.
    #[error("executor backend error: {0}")]
    Backend(String),
}

/// The executor capability set.
///
/// `submit` must be idempotent with respect to an identical [`JobSpec`]:
/// re-submitting a spec whose handle already exists is a no-op, never a
/// second container.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Which backend this executor drives.
    fn kind(&self) -> ExecutorKind;

    /// Resolves an image reference to a `sha256:<64 hex>` digest.
    async fn resolve_image_id(&self, image_ref: &str) -> Result<String, ExecutorError>;

    /// Launches the job described by `spec`.
    async fn submit(&self, spec: &JobSpec) -> Result<(), ExecutorError>;

    /// Reports the current status of a previously submitted execution.
    async fn inspect(&self, execution: &Execution) -> Result<Observation, ExecutorError>;
}
