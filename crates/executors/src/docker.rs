//! The docker executor: one container per run on the local daemon.

use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, InspectContainerOptions, StartContainerOptions};
use bollard::models::ContainerStateStatusEnum;
use bollard::Docker;

use animus_api::executor::{Executor, ExecutorError, JobSpec, Observation, ObservedStatus};
use animus_types::execution::{Execution, ExecutorHandle, ExecutorKind};

use crate::job_env;

pub struct DockerExecutor {
    docker: Docker,
}

impl DockerExecutor {
    /// Connects to the local daemon (socket or named pipe).
    pub fn connect() -> Result<Self, ExecutorError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ExecutorError::Backend(e.to_string()))?;
        Ok(Self { docker })
    }

    fn container_name<'a>(handle: &'a ExecutorHandle) -> Result<&'a str, ExecutorError> {
        match handle {
            ExecutorHandle::Docker { container_name } => Ok(container_name),
            other => Err(ExecutorError::Backend(format!(
                "docker executor received a {} handle",
                match other {
                    ExecutorHandle::K8s { .. } => "kubernetes",
                    ExecutorHandle::Docker { .. } => "docker",
                }
            ))),
        }
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_conflict(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            ..
        }
    )
}

#[async_trait]
impl Executor for DockerExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Docker
    }

    async fn resolve_image_id(&self, image_ref: &str) -> Result<String, ExecutorError> {
        let inspect = self.docker.inspect_image(image_ref).await.map_err(|e| {
            if is_not_found(&e) {
                ExecutorError::ImageNotFound(image_ref.to_string())
            } else {
                ExecutorError::Backend(e.to_string())
            }
        })?;

        // Prefer the registry digest; fall back to the local image id,
        // which is also a sha256 content hash.
        if let Some(digest) = inspect
            .repo_digests
            .as_ref()
            .and_then(|digests| digests.first())
            .and_then(|d| d.rsplit_once('@'))
            .map(|(_, digest)| digest.to_string())
        {
            return Ok(digest);
        }
        inspect
            .id
            .ok_or_else(|| ExecutorError::ImageNotFound(image_ref.to_string()))
    }

    async fn submit(&self, spec: &JobSpec) -> Result<(), ExecutorError> {
        spec.validate_env()?;
        let name = Self::container_name(&spec.handle)?;

        // Idempotency: an existing container with this deterministic name
        // is the same submission.
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => {
                tracing::debug!(target: "executor", container = %name, "container already exists, submit is a no-op");
                return Ok(());
            }
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(ExecutorError::Backend(e.to_string())),
        }

        let env: Vec<String> = job_env(spec)
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let labels = [
            ("dev.animus.run-id".to_string(), spec.run_id.clone()),
            (
                "dev.animus.job-kind".to_string(),
                spec.job_kind.as_str().to_string(),
            ),
        ]
        .into_iter()
        .collect();

        let config = Config {
            image: Some(spec.image_execution_ref.clone()),
            env: Some(env),
            labels: Some(labels),
            ..Default::default()
        };
        match self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name,
                    platform: None,
                }),
                config,
            )
            .await
        {
            Ok(_) => {}
            // Lost a race with another submitter: same handle, same job.
            Err(e) if is_conflict(&e) => return Ok(()),
            Err(e) => return Err(ExecutorError::Submit(e.to_string())),
        }

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ExecutorError::Submit(e.to_string()))?;
        tracing::info!(target: "executor", container = %name, "container started");
        Ok(())
    }

    async fn inspect(&self, execution: &Execution) -> Result<Observation, ExecutorError> {
        let name = Self::container_name(&execution.executor_handle)?;
        let response = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ExecutorError::Inspect(format!("container {name} not found"))
                } else {
                    ExecutorError::Backend(e.to_string())
                }
            })?;

        let state = response.state.unwrap_or_default();
        let (status, message) = match state.status {
            Some(ContainerStateStatusEnum::RUNNING)
            | Some(ContainerStateStatusEnum::RESTARTING) => (ObservedStatus::Running, None),
            Some(ContainerStateStatusEnum::EXITED)
            | Some(ContainerStateStatusEnum::DEAD) => {
                let exit_code = state.exit_code.unwrap_or(-1);
                if exit_code == 0 {
                    (ObservedStatus::Succeeded, None)
                } else {
                    (
                        ObservedStatus::Failed,
                        Some(format!("container exited with code {exit_code}")),
                    )
                }
            }
            _ => (ObservedStatus::Pending, None),
        };

        Ok(Observation {
            status,
            message,
            details: Some(serde_json::json!({
                "exit_code": state.exit_code,
                "error": state.error,
                "oom_killed": state.oom_killed,
            })),
        })
    }
}
