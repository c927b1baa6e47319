//! The run entity and its append-only satellite records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::error::ValidationError;

/// A governed unit of execution, bound at submission time to an immutable
/// (dataset version, git commit, image digest) triple. Never mutated after
/// creation; all visible change goes through the state-event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub run_id: String,
    pub experiment_id: String,
    pub dataset_version_id: String,
    pub git_repo: String,
    pub git_commit: String,
    pub git_ref: Option<String>,
    pub image_ref: String,
    /// Always a lowercase `sha256:<64 hex>` string.
    pub image_digest: String,
    pub params: Value,
    pub resources: crate::execution::Resources,
    pub artifacts_prefix: String,
    pub created_by: String,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
    pub integrity_sha256: String,
}

/// The lifecycle states a run moves through. `created` is implicit in the
/// run row itself; state events record the transitions after submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Terminal states are never re-opened, not even by the reconciler.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only entry in a run's state-event log. Unique on
/// `(run_id, status)`; the current status of a run is the event with the
/// greatest `(observed_at, state_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStateEvent {
    pub state_id: String,
    pub run_id: String,
    pub status: RunStatus,
    #[serde(with = "codec::ts")]
    pub observed_at: DateTime<Utc>,
    pub details: Option<Value>,
    pub integrity_sha256: String,
}

/// Severity levels for run log events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// A log line attached to a run, numbered monotonically per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    /// Monotonically increasing per run, assigned by the store.
    pub event_id: u64,
    pub run_id: String,
    pub level: EventLevel,
    pub message: String,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
}

/// A single metric observation. Unique on `(run_id, name, step)` so
/// re-submission of the same step is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub sample_id: String,
    pub run_id: String,
    pub step: u64,
    pub name: String,
    pub value: f64,
    pub metadata: Option<Value>,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
}

/// What kind of artifact a run registered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Model,
    Log,
    Other,
}

/// An artifact registered by the executing container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub artifact_id: String,
    pub run_id: String,
    pub name: String,
    pub object_key: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub kind: ArtifactKind,
    #[serde(with = "codec::ts")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_strings() {
        for s in ["pending", "running", "succeeded", "failed", "canceled"] {
            assert_eq!(RunStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(RunStatus::parse("exploded").is_err());
    }

    #[test]
    fn terminality() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
    }
}
