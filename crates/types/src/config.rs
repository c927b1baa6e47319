//! Environment-driven configuration for the control-plane daemon.
//!
//! Every knob is read once at startup. Optional secrets stay `None` until a
//! code path actually needs them, at which point a missing value surfaces
//! the matching `*_not_configured` error.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::execution::ExecutorKind;

/// Default TTL for run-scoped tokens when `ANIMUS_RUN_TOKEN_TTL_SECS` is
/// unset: 24 hours.
pub const DEFAULT_RUN_TOKEN_TTL_SECS: u64 = 86_400;
/// Default maximum clock skew accepted on CI webhook signatures.
pub const DEFAULT_CI_WEBHOOK_MAX_SKEW_SECS: u64 = 300;
/// Default reconciler tick interval.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 10;
/// Default reconciler batch size per tick.
pub const DEFAULT_RECONCILE_BATCH: usize = 50;

/// Which training executor the deployment runs, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingExecutor {
    Docker,
    KubernetesJob,
    Disabled,
}

impl TrainingExecutor {
    pub fn kind(&self) -> Option<ExecutorKind> {
        match self {
            Self::Docker => Some(ExecutorKind::Docker),
            Self::KubernetesJob => Some(ExecutorKind::KubernetesJob),
            Self::Disabled => None,
        }
    }
}

/// Full configuration of the control-plane daemon.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    pub telemetry_addr: Option<SocketAddr>,
    pub datapilot_url: Option<String>,
    pub training_executor: TrainingExecutor,
    pub training_namespace: Option<String>,
    pub run_token_secret: Option<String>,
    pub run_token_ttl: Duration,
    pub evidence_signing_secret: Option<String>,
    pub ci_webhook_secret: Option<String>,
    pub ci_webhook_max_skew: Duration,
    pub api_token: Option<String>,
    pub reconcile_interval: Duration,
    pub reconcile_batch: usize,
}

impl NodeConfig {
    /// Reads every `ANIMUS_*` knob from the process environment. Only the
    /// listen address has a hard default; secrets are checked at use.
    pub fn from_env() -> Result<Self, String> {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        let listen_addr = var("ANIMUS_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e| format!("ANIMUS_LISTEN_ADDR: {e}"))?;
        let telemetry_addr = match var("ANIMUS_TELEMETRY_ADDR") {
            Some(v) => Some(v.parse().map_err(|e| format!("ANIMUS_TELEMETRY_ADDR: {e}"))?),
            None => None,
        };
        let training_executor = match var("ANIMUS_TRAINING_EXECUTOR").as_deref() {
            None | Some("disabled") => TrainingExecutor::Disabled,
            Some("docker") => TrainingExecutor::Docker,
            Some("kubernetes_job") => TrainingExecutor::KubernetesJob,
            Some(other) => return Err(format!("ANIMUS_TRAINING_EXECUTOR: unknown executor '{other}'")),
        };
        let secs = |name: &str, default: u64| -> Result<u64, String> {
            match var(name) {
                None => Ok(default),
                Some(v) => v.parse().map_err(|e| format!("{name}: {e}")),
            }
        };

        Ok(Self {
            listen_addr,
            telemetry_addr,
            datapilot_url: var("DATAPILOT_URL"),
            training_executor,
            training_namespace: var("ANIMUS_TRAINING_NAMESPACE"),
            run_token_secret: var("ANIMUS_RUN_TOKEN_SECRET"),
            run_token_ttl: Duration::from_secs(secs(
                "ANIMUS_RUN_TOKEN_TTL_SECS",
                DEFAULT_RUN_TOKEN_TTL_SECS,
            )?),
            evidence_signing_secret: var("ANIMUS_EVIDENCE_SIGNING_SECRET"),
            ci_webhook_secret: var("ANIMUS_CI_WEBHOOK_SECRET"),
            ci_webhook_max_skew: Duration::from_secs(secs(
                "ANIMUS_CI_WEBHOOK_MAX_SKEW_SECS",
                DEFAULT_CI_WEBHOOK_MAX_SKEW_SECS,
            )?),
            api_token: var("ANIMUS_API_TOKEN"),
            reconcile_interval: Duration::from_secs(secs(
                "ANIMUS_RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL_SECS,
            )?),
            reconcile_batch: secs("ANIMUS_RECONCILE_BATCH", DEFAULT_RECONCILE_BATCH as u64)?
                as usize,
        })
    }

    pub fn run_token_secret(&self) -> Result<&str, ConfigError> {
        self.run_token_secret.as_deref().ok_or(ConfigError::RunTokenSecret)
    }

    pub fn evidence_signing_secret(&self) -> Result<&str, ConfigError> {
        self.evidence_signing_secret
            .as_deref()
            .ok_or(ConfigError::EvidenceSigningSecret)
    }

    pub fn ci_webhook_secret(&self) -> Result<&str, ConfigError> {
        self.ci_webhook_secret.as_deref().ok_or(ConfigError::CiWebhookSecret)
    }

    pub fn datapilot_url(&self) -> Result<&str, ConfigError> {
        self.datapilot_url.as_deref().ok_or(ConfigError::DatapilotUrl)
    }

    pub fn training_namespace(&self) -> Result<&str, ConfigError> {
        self.training_namespace
            .as_deref()
            .ok_or(ConfigError::TrainingNamespace)
    }
}

impl Default for NodeConfig {
    /// A permissive configuration for tests and single-process development.
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            telemetry_addr: None,
            datapilot_url: Some("http://127.0.0.1:8080".to_string()),
            training_executor: TrainingExecutor::Docker,
            training_namespace: None,
            run_token_secret: None,
            run_token_ttl: Duration::from_secs(DEFAULT_RUN_TOKEN_TTL_SECS),
            evidence_signing_secret: None,
            ci_webhook_secret: None,
            ci_webhook_max_skew: Duration::from_secs(DEFAULT_CI_WEBHOOK_MAX_SKEW_SECS),
            api_token: None,
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            reconcile_batch: DEFAULT_RECONCILE_BATCH,
        }
    }
}
