#![forbid(unsafe_code)]

//! Executor backends for the Animus control plane.
//!
//! Each backend implements the `Executor` port for one kind: docker
//! containers for single-host deployments, Kubernetes Jobs for clusters.
//! Both are side-effect idempotent on `submit` — resubmitting a job whose
//! handle already exists is a no-op.

mod docker;
mod kubernetes;

pub use docker::DockerExecutor;
pub use kubernetes::KubernetesExecutor;

use std::collections::BTreeMap;

use animus_api::executor::JobSpec;

/// The full container environment for a job: the reserved keys injected by
/// the control plane, then the caller-supplied extras (which have already
/// been checked against the reserved set).
pub(crate) fn job_env(spec: &JobSpec) -> BTreeMap<String, String> {
    let mut env = spec.env.clone();
    env.insert("ANIMUS_RUN_ID".to_string(), spec.run_id.clone());
    env.insert("ANIMUS_RUN_TOKEN".to_string(), spec.run_token.clone());
    env.insert(
        "ANIMUS_DATASET_VERSION_ID".to_string(),
        spec.dataset_version_id.clone(),
    );
    env.insert(
        "ANIMUS_JOB_KIND".to_string(),
        spec.job_kind.as_str().to_string(),
    );
    env.insert("DATAPILOT_URL".to_string(), spec.datapilot_url.clone());
    env
}
