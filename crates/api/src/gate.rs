//! The dataset registry / quality gate port.

use async_trait::async_trait;
use thiserror::Error;

use animus_types::dataset::DatasetVersion;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("dataset gate upstream error: {0}")]
    Upstream(String),
}

/// Supplies immutable dataset versions with content hashes and their
/// quality gate verdicts.
#[async_trait]
pub trait DatasetGate: Send + Sync {
    async fn dataset_version(
        &self,
        dataset_version_id: &str,
    ) -> Result<Option<DatasetVersion>, GateError>;
}
