//! The Kubernetes executor: one batch Job per run.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, PostParams};
use kube::Client;

use animus_api::executor::{Executor, ExecutorError, JobSpec, Observation, ObservedStatus};
use animus_types::execution::{Execution, ExecutorHandle, ExecutorKind, Resources};

use crate::job_env;

pub struct KubernetesExecutor {
    client: Client,
}

impl KubernetesExecutor {
    /// Connects using the ambient kubeconfig or in-cluster service account.
    pub async fn connect() -> Result<Self, ExecutorError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ExecutorError::Backend(e.to_string()))?;
        Ok(Self { client })
    }

    fn handle_parts(handle: &ExecutorHandle) -> Result<(&str, &str), ExecutorError> {
        match handle {
            ExecutorHandle::K8s {
                namespace,
                job_name,
            } => Ok((namespace, job_name)),
            ExecutorHandle::Docker { .. } => Err(ExecutorError::Backend(
                "kubernetes executor received a docker handle".into(),
            )),
        }
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn resource_map(resources: &Resources) -> serde_json::Value {
    let mut limits = serde_json::Map::new();
    if let Some(cpu) = &resources.cpu {
        limits.insert("cpu".into(), serde_json::Value::String(cpu.clone()));
    }
    if let Some(memory) = &resources.memory {
        limits.insert("memory".into(), serde_json::Value::String(memory.clone()));
    }
    if resources.gpu_count > 0 {
        limits.insert(
            "nvidia.com/gpu".into(),
            serde_json::Value::String(resources.gpu_count.to_string()),
        );
    }
    serde_json::json!({ "limits": limits.clone(), "requests": limits })
}

fn build_job(spec: &JobSpec, job_name: &str) -> Result<Job, ExecutorError> {
    let env: Vec<serde_json::Value> = job_env(spec)
        .into_iter()
        .map(|(name, value)| serde_json::json!({"name": name, "value": value}))
        .collect();

    serde_json::from_value(serde_json::json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job_name,
            "labels": {
                "app.kubernetes.io/managed-by": "animus",
                "animus.dev/run-id": spec.run_id,
                "animus.dev/job-kind": spec.job_kind.as_str(),
            },
        },
        "spec": {
            "backoffLimit": 0,
            "template": {
                "metadata": {
                    "labels": { "animus.dev/run-id": spec.run_id },
                },
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "workload",
                        "image": spec.image_execution_ref,
                        "env": env,
                        "resources": resource_map(&spec.resources),
                    }],
                },
            },
        },
    }))
    .map_err(|e| ExecutorError::Submit(format!("job manifest: {e}")))
}

fn is_api_code(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

#[async_trait]
impl Executor for KubernetesExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::KubernetesJob
    }

    async fn resolve_image_id(&self, image_ref: &str) -> Result<String, ExecutorError> {
        // The cluster pulls images itself; references must arrive pinned.
        Err(ExecutorError::Backend(format!(
            "kubernetes executor cannot resolve '{image_ref}'; digest-pinned references are required"
        )))
    }

    async fn submit(&self, spec: &JobSpec) -> Result<(), ExecutorError> {
        spec.validate_env()?;
        let (namespace, job_name) = Self::handle_parts(&spec.handle)?;
        let jobs = self.jobs(namespace);

        match jobs.get_opt(job_name).await {
            Ok(Some(_)) => {
                tracing::debug!(target: "executor", job = %job_name, "job already exists, submit is a no-op");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => return Err(ExecutorError::Backend(e.to_string())),
        }

        let job = build_job(spec, job_name)?;
        match jobs.create(&PostParams::default(), &job).await {
            Ok(_) => {
                tracing::info!(target: "executor", namespace = %namespace, job = %job_name, "job created");
                Ok(())
            }
            // Lost a race with another submitter: same handle, same job.
            Err(e) if is_api_code(&e, 409) => Ok(()),
            Err(e) => Err(ExecutorError::Submit(e.to_string())),
        }
    }

    async fn inspect(&self, execution: &Execution) -> Result<Observation, ExecutorError> {
        let (namespace, job_name) = Self::handle_parts(&execution.executor_handle)?;
        let job = self
            .jobs(namespace)
            .get_opt(job_name)
            .await
            .map_err(|e| ExecutorError::Backend(e.to_string()))?
            .ok_or_else(|| ExecutorError::Inspect(format!("job {job_name} not found")))?;

        let status = job.status.unwrap_or_default();
        let failed_message = status
            .conditions
            .as_ref()
            .and_then(|conditions| {
                conditions
                    .iter()
                    .find(|c| c.type_ == "Failed" && c.status == "True")
                    .and_then(|c| c.message.clone())
            })
            .unwrap_or_else(|| "job failed".to_string());

        let observed = if status.succeeded.unwrap_or(0) > 0 {
            Observation {
                status: ObservedStatus::Succeeded,
                message: None,
                details: None,
            }
        } else if status.failed.unwrap_or(0) > 0 {
            Observation {
                status: ObservedStatus::Failed,
                message: Some(failed_message),
                details: serde_json::to_value(&status.conditions).ok(),
            }
        } else if status.active.unwrap_or(0) > 0 {
            Observation {
                status: ObservedStatus::Running,
                message: None,
                details: None,
            }
        } else {
            Observation {
                status: ObservedStatus::Pending,
                message: None,
                details: None,
            }
        };
        Ok(observed)
    }
}
