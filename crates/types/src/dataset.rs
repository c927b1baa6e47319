//! Dataset registry view consumed by the submission gate.

use serde::{Deserialize, Serialize};

/// Quality gate verdict a dataset version must hold before any run may
/// execute against it.
pub const DATASET_QUALITY_PASS: &str = "pass";

/// An immutable dataset version as reported by the dataset registry and
/// quality gate collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetVersion {
    pub dataset_id: String,
    pub dataset_version_id: String,
    /// Content hash of the dataset version.
    pub sha256: String,
    /// Latest quality gate evaluation: `pass` or a failure label.
    pub quality: String,
}

impl DatasetVersion {
    pub fn passes_quality_gate(&self) -> bool {
        self.quality == DATASET_QUALITY_PASS
    }
}
