//! The materialized execution of a run and the executor vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;

/// Which executor backend a job targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Docker,
    KubernetesJob,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::KubernetesJob => "kubernetes_job",
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The executor-specific identity of a submitted job. Tagged variants, not
/// inheritance: a new executor means a new variant plus a new port
/// implementation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorHandle {
    K8s { namespace: String, job_name: String },
    Docker { container_name: String },
}

impl ExecutorHandle {
    /// The human-facing name of the underlying job or container.
    pub fn name(&self) -> &str {
        match self {
            Self::K8s { job_name, .. } => job_name,
            Self::Docker { container_name } => container_name,
        }
    }
}

/// Requested compute resources. Opaque to the control plane apart from the
/// GPU count, which policy rules may cap.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
}

/// Whether a job trains or evaluates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Training,
    Evaluation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Evaluation => "evaluation",
        }
    }
}

/// The materialized container job for a run. At most one per run; the store
/// enforces uniqueness on `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub execution_id: String,
    pub run_id: String,
    pub executor: ExecutorKind,
    pub image_ref: String,
    pub image_digest: String,
    pub resources: Resources,
    pub executor_handle: ExecutorHandle,
    pub datapilot_url: String,
    /// SHA-256 of the run-scoped bearer token; the token itself is never
    /// persisted.
    pub run_token_sha256: String,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    pub integrity_sha256: String,
}

/// A scheduled evaluation of a succeeded run's model artifact. Follows the
/// same executor/state pattern as [`Execution`], scoped to the evaluation
/// entity. Unique on `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub evaluation_id: String,
    pub run_id: String,
    pub executor: ExecutorKind,
    pub image_ref: String,
    pub image_digest: String,
    pub executor_handle: ExecutorHandle,
    pub status: crate::run::RunStatus,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "codec::ts")]
    pub updated_at: DateTime<Utc>,
    pub integrity_sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_serializes_tagged() {
        let h = ExecutorHandle::K8s {
            namespace: "ml".into(),
            job_name: "animus-run-r1".into(),
        };
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(v["kind"], "k8s");
        assert_eq!(v["job_name"], "animus-run-r1");

        let d = ExecutorHandle::Docker {
            container_name: "animus-run-r1".into(),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["kind"], "docker");
    }

    #[test]
    fn executor_kind_strings() {
        assert_eq!(ExecutorKind::Docker.as_str(), "docker");
        assert_eq!(ExecutorKind::KubernetesJob.as_str(), "kubernetes_job");
    }
}
