//! The human-report renderer port (external PDF collaborator).

use async_trait::async_trait;
use thiserror::Error;

use animus_types::policy::{Approval, PolicyDecision};
use animus_types::run::{Run, RunStatus};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report rendering failed: {0}")]
    Render(String),
}

/// The governance context a report describes.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub run: Run,
    pub status: Option<RunStatus>,
    pub decisions: Vec<PolicyDecision>,
    pub approvals: Vec<Approval>,
}

/// Renders `report.pdf` for an evidence bundle. The bytes must be
/// deterministic for a given context so bundle builds stay reproducible.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, ctx: &ReportContext) -> Result<Vec<u8>, ReportError>;
}
