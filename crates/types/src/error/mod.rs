//! Error types for the Animus control plane.
//!
//! Every error the API surface can return carries a stable, machine-readable
//! string code via the [`ErrorCode`] trait. Handlers map codes to HTTP
//! statuses; the codes themselves never change once shipped.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors from the canonical JSON codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be canonicalized (e.g. NaN, non-string map key).
    #[error("canonical serialization failed: {0}")]
    Serialization(String),
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::Serialization(_) => "serialization_error",
        }
    }
}

/// Errors from request validation, before anything is persisted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The request body was not parseable JSON.
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),
    /// The run specification failed a structural check.
    #[error("invalid run spec: {0}")]
    InvalidSpec(String),
    /// The supplied params document is not an object.
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// An unknown run status string was supplied.
    #[error("invalid status: {0}")]
    InvalidStatus(String),
}

impl ErrorCode for ValidationError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::InvalidSpec(_) => "invalid_spec",
            Self::InvalidParams(_) => "invalid_params",
            Self::InvalidStatus(_) => "invalid_status",
        }
    }
}

/// Errors from image reference resolution (the digest-pinning gate).
#[derive(Debug, Error)]
pub enum ImageError {
    /// No image reference was supplied.
    #[error("image reference is required")]
    RefRequired,
    /// The kubernetes executor requires a digest-pinned reference.
    #[error("image reference must be pinned with @sha256:<digest>: {0}")]
    DigestRequired(String),
    /// The executor could not resolve the reference to a digest.
    #[error("image reference not found: {0}")]
    RefNotFound(String),
    /// The executor backend failed while resolving.
    #[error("image resolution failed: {0}")]
    ResolutionFailed(String),
}

impl ErrorCode for ImageError {
    fn code(&self) -> &'static str {
        match self {
            Self::RefRequired => "image_ref_required",
            Self::DigestRequired(_) => "image_ref_digest_required",
            Self::RefNotFound(_) => "image_ref_not_found",
            Self::ResolutionFailed(_) => "image_ref_resolution_failed",
        }
    }
}

/// Precondition failures on the submission path.
#[derive(Debug, Error)]
pub enum PreconditionError {
    /// A git commit is required for a governed run.
    #[error("git commit is required")]
    GitCommitRequired,
    /// The submitted repo conflicts with the image attestation.
    #[error("git repo conflicts with image attestation: submitted {submitted}, attested {attested}")]
    GitRepoConflict { submitted: String, attested: String },
    /// The submitted commit conflicts with the image attestation.
    #[error("git commit conflicts with image attestation: submitted {submitted}, attested {attested}")]
    GitCommitConflict { submitted: String, attested: String },
    /// The dataset version did not pass its quality gate.
    #[error("dataset version {dataset_version_id} quality gate is '{quality}', not 'pass'")]
    QualityGateFailed {
        dataset_version_id: String,
        quality: String,
    },
    /// No training executor is configured on this deployment.
    #[error("training executor is disabled")]
    TrainingExecutorDisabled,
}

impl ErrorCode for PreconditionError {
    fn code(&self) -> &'static str {
        match self {
            Self::GitCommitRequired => "git_commit_required",
            Self::GitRepoConflict { .. } => "git_repo_conflict",
            Self::GitCommitConflict { .. } => "git_commit_conflict",
            Self::QualityGateFailed { .. } => "quality_gate_failed",
            Self::TrainingExecutorDisabled => "training_executor_disabled",
        }
    }
}

/// State-machine and uniqueness conflicts.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested transition is not legal from the current status.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    /// An execution has already been materialized for this run.
    #[error("execution already exists for run {0}")]
    ExecutionAlreadyExists(String),
    /// A ledger entry has already been written for this run.
    #[error("ledger entry already exists for run {0}")]
    LedgerAlreadyExists(String),
    /// The ledger cannot be assembled because required inputs are missing.
    #[error("ledger prerequisites missing: {0}")]
    LedgerPrerequisitesMissing(String),
}

impl ErrorCode for StateError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ExecutionAlreadyExists(_) => "execution_already_exists",
            Self::LedgerAlreadyExists(_) => "conflict",
            Self::LedgerPrerequisitesMissing(_) => "internal_error",
        }
    }
}

/// Errors from the two-reviewer approval protocol.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The approval has already been resolved.
    #[error("approval {0} is not pending")]
    NotPending(String),
    /// The resolving subject is the same as the requester.
    #[error("approval requires a second reviewer distinct from the requester")]
    SecondReviewerRequired,
    /// The resolving subject does not hold the admin capability.
    #[error("approval resolution requires the admin capability")]
    AdminRequired,
    /// Another reviewer has denied an approval on this run.
    #[error("an approval on run {0} has been denied")]
    Denied(String),
}

impl ErrorCode for ApprovalError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotPending(_) => "approval_not_pending",
            Self::SecondReviewerRequired => "approval_requires_second_reviewer",
            Self::AdminRequired => "approval_requires_admin",
            Self::Denied(_) => "approval_denied",
        }
    }
}

/// Authorization failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or unverifiable credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The aggregate policy decision denied the run.
    #[error("denied by policy (rule {})", .rule_id.as_deref().unwrap_or("unspecified"))]
    PolicyDenied { rule_id: Option<String> },
}

impl ErrorCode for AuthError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::PolicyDenied { .. } => "policy_denied",
        }
    }
}

/// Errors from telemetry ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A metric value was not a finite number.
    #[error("metric '{0}' has a non-numeric or non-finite value")]
    InvalidMetricValue(String),
    /// The metric step was negative.
    #[error("metric step must be >= 0")]
    InvalidStep,
}

impl ErrorCode for IngestError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidMetricValue(_) => "invalid_metric_value",
            Self::InvalidStep => "invalid_spec",
        }
    }
}

/// Failures of upstream collaborators (executor, object store, side logs).
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The object store rejected or failed an operation.
    #[error("object store error: {0}")]
    ObjectStore(String),
    /// The executor rejected the job submission.
    #[error("training submission failed: {0}")]
    TrainingSubmit(String),
    /// The lineage log could not be written inside a critical transaction.
    #[error("lineage write failed: {0}")]
    LineageWrite(String),
    /// The audit log could not be written inside a critical transaction.
    #[error("audit write failed: {0}")]
    AuditWrite(String),
}

impl ErrorCode for UpstreamError {
    fn code(&self) -> &'static str {
        match self {
            Self::ObjectStore(_) => "object_store_error",
            Self::TrainingSubmit(_) => "training_submit_failed",
            Self::LineageWrite(_) => "lineage_write_failed",
            Self::AuditWrite(_) => "audit_failed",
        }
    }
}

/// Errors from the relational store port.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A backend failure (connection, constraint the port does not model).
    #[error("store backend error: {0}")]
    Backend(String),
    /// A row failed to (de)serialize.
    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Backend(_) => "internal_error",
            Self::Serialization(_) => "internal_error",
        }
    }
}

/// Missing environment configuration, surfaced at the point of use.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ANIMUS_RUN_TOKEN_SECRET is not configured")]
    RunTokenSecret,
    #[error("ANIMUS_EVIDENCE_SIGNING_SECRET is not configured")]
    EvidenceSigningSecret,
    #[error("ANIMUS_CI_WEBHOOK_SECRET is not configured")]
    CiWebhookSecret,
    #[error("DATAPILOT_URL is not configured")]
    DatapilotUrl,
    #[error("ANIMUS_TRAINING_NAMESPACE is not configured")]
    TrainingNamespace,
    #[error("ANIMUS_GATEWAY_URL is not configured")]
    GatewayUrl,
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::RunTokenSecret => "run_token_secret_not_configured",
            Self::EvidenceSigningSecret => "evidence_signing_secret_not_configured",
            Self::CiWebhookSecret => "ci_webhook_secret_not_configured",
            Self::DatapilotUrl => "datapilot_url_not_configured",
            Self::TrainingNamespace => "training_namespace_not_configured",
            Self::GatewayUrl => "gateway_url_not_configured",
        }
    }
}

/// The aggregate error type the core operations return.
///
/// Each variant wraps one of the per-domain enums; [`ErrorCode`] delegates
/// so the gateway can map any core failure to its stable code without
/// knowing which subsystem produced it.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A uniqueness conflict the port does not model more precisely.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Fallback for failures with no stable code of their own.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Codec(e) => e.code(),
            Self::Validation(e) => e.code(),
            Self::Image(e) => e.code(),
            Self::Precondition(e) => e.code(),
            Self::State(e) => e.code(),
            Self::Approval(e) => e.code(),
            Self::Auth(e) => e.code(),
            Self::Ingest(e) => e.code(),
            Self::Upstream(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Config(e) => e.code(),
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
        }
    }
}
