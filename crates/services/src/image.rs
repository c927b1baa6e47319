//! The image resolver: the single gate enforcing that no unpinned image
//! ever reaches execution.

use animus_api::executor::{Executor, ExecutorError};
use animus_types::digest;
use animus_types::error::{CoreError, ImageError};
use animus_types::execution::ExecutorKind;

/// A resolved image: the submitted reference, its digest, and the
/// digest-pinned reference executions run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub image_ref: String,
    pub image_digest: String,
    pub execution_ref: String,
}

/// Resolves an image reference under the rules of the target executor.
///
/// Kubernetes requires the reference itself to carry `@sha256:<64 hex>`;
/// docker falls back to asking the daemon for the digest of a tag
/// reference. Output digests are always lowercase.
pub async fn resolve(
    executor: &dyn Executor,
    image_ref: &str,
) -> Result<ResolvedImage, CoreError> {
    let image_ref = image_ref.trim();
    if image_ref.is_empty() {
        return Err(ImageError::RefRequired.into());
    }

    if let Some(image_digest) = digest::digest_from_ref(image_ref) {
        return Ok(ResolvedImage {
            image_ref: image_ref.to_string(),
            execution_ref: image_ref.to_string(),
            image_digest,
        });
    }

    match executor.kind() {
        ExecutorKind::KubernetesJob => {
            Err(ImageError::DigestRequired(image_ref.to_string()).into())
        }
        ExecutorKind::Docker => {
            let raw = executor.resolve_image_id(image_ref).await.map_err(|e| match e {
                ExecutorError::ImageNotFound(r) => CoreError::from(ImageError::RefNotFound(r)),
                other => CoreError::from(ImageError::ResolutionFailed(other.to_string())),
            })?;
            let image_digest = digest::normalize_digest(&raw)
                .ok_or_else(|| ImageError::RefNotFound(image_ref.to_string()))?;
            Ok(ResolvedImage {
                image_ref: image_ref.to_string(),
                execution_ref: pinned_ref(image_ref, &image_digest),
                image_digest,
            })
        }
    }
}

/// The digest-pinned reference an execution runs against: the reference
/// itself when already pinned, otherwise the repo re-pinned to the digest.
pub fn pinned_execution_ref(image_ref: &str, image_digest: &str) -> String {
    if digest::is_pinned(image_ref) {
        image_ref.to_string()
    } else {
        pinned_ref(image_ref, image_digest)
    }
}

/// Builds the digest-pinned execution reference for a tag reference:
/// `ghcr.io/acme/train:latest` + `sha256:bb…` → `ghcr.io/acme/train@sha256:bb…`.
/// Registry ports (`host:5000/repo`) are left intact.
fn pinned_ref(image_ref: &str, image_digest: &str) -> String {
    let repo = match image_ref.rsplit_once('/') {
        Some((prefix, last)) => match last.split_once(':') {
            Some((name, _tag)) => format!("{prefix}/{name}"),
            None => image_ref.to_string(),
        },
        None => image_ref
            .split_once(':')
            .map(|(name, _)| name.to_string())
            .unwrap_or_else(|| image_ref.to_string()),
    };
    format!("{repo}@{image_digest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use animus_api::executor::{JobSpec, Observation};
    use animus_types::error::ErrorCode;
    use animus_types::execution::Execution;
    use async_trait::async_trait;

    const HEX: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    struct FakeExecutor {
        kind: ExecutorKind,
        resolves_to: Option<String>,
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        fn kind(&self) -> ExecutorKind {
            self.kind
        }
        async fn resolve_image_id(&self, image_ref: &str) -> Result<String, ExecutorError> {
            self.resolves_to
                .clone()
                .ok_or_else(|| ExecutorError::ImageNotFound(image_ref.to_string()))
        }
        async fn submit(&self, _spec: &JobSpec) -> Result<(), ExecutorError> {
            Ok(())
        }
        async fn inspect(&self, _execution: &Execution) -> Result<Observation, ExecutorError> {
            Err(ExecutorError::Backend("not under test".into()))
        }
    }

    #[tokio::test]
    async fn pinned_ref_passes_through_any_executor() {
        let pinned = format!("ghcr.io/acme/train@sha256:{HEX}");
        for kind in [ExecutorKind::Docker, ExecutorKind::KubernetesJob] {
            let exec = FakeExecutor { kind, resolves_to: None };
            let resolved = resolve(&exec, &pinned).await.unwrap();
            assert_eq!(resolved.image_digest, format!("sha256:{HEX}"));
            assert_eq!(resolved.execution_ref, pinned);
        }
    }

    #[tokio::test]
    async fn kubernetes_rejects_unpinned_refs() {
        let exec = FakeExecutor {
            kind: ExecutorKind::KubernetesJob,
            resolves_to: Some(format!("sha256:{HEX}")),
        };
        let err = resolve(&exec, "ghcr.io/acme/train:latest").await.unwrap_err();
        assert_eq!(err.code(), "image_ref_digest_required");
    }

    #[tokio::test]
    async fn docker_resolves_tags_through_the_daemon() {
        let exec = FakeExecutor {
            kind: ExecutorKind::Docker,
            resolves_to: Some(format!("SHA256:{}", HEX.to_ascii_uppercase())),
        };
        let resolved = resolve(&exec, "ghcr.io/acme/train:latest").await.unwrap();
        assert_eq!(resolved.image_digest, format!("sha256:{HEX}"));
        assert_eq!(
            resolved.execution_ref,
            format!("ghcr.io/acme/train@sha256:{HEX}")
        );
    }

    #[tokio::test]
    async fn docker_unknown_ref_is_not_found() {
        let exec = FakeExecutor {
            kind: ExecutorKind::Docker,
            resolves_to: None,
        };
        let err = resolve(&exec, "ghcr.io/acme/missing:1").await.unwrap_err();
        assert_eq!(err.code(), "image_ref_not_found");
    }

    #[tokio::test]
    async fn empty_ref_is_required() {
        let exec = FakeExecutor {
            kind: ExecutorKind::Docker,
            resolves_to: None,
        };
        let err = resolve(&exec, "  ").await.unwrap_err();
        assert_eq!(err.code(), "image_ref_required");
    }

    #[test]
    fn pinned_ref_keeps_registry_ports() {
        assert_eq!(
            pinned_ref("registry.local:5000/acme/train:2.1", "sha256:aa"),
            "registry.local:5000/acme/train@sha256:aa"
        );
        assert_eq!(pinned_ref("train", "sha256:aa"), "train@sha256:aa");
        assert_eq!(pinned_ref("train:latest", "sha256:aa"), "train@sha256:aa");
    }
}
