#![forbid(unsafe_code)]

//! The Animus run execution governance engine.
//!
//! This crate is the core of the control plane: it turns a submitted run
//! specification into a materialized execution, coordinates the
//! policy/approval gate, launches and observes containers through the
//! executor port, ingests telemetry, and seals runs into signed evidence
//! bundles. Every mutating path writes its ledger/lineage/audit records in
//! the same store transaction as the domain change.

use std::collections::BTreeMap;
use std::sync::Arc;

use animus_api::executor::Executor;
use animus_api::gate::DatasetGate;
use animus_api::object_store::ObjectStore;
use animus_api::report::ReportRenderer;
use animus_api::store::MetaStore;
use animus_types::config::NodeConfig;
use animus_types::error::{CoreError, PreconditionError};
use animus_types::execution::ExecutorKind;

pub mod approvals;
pub mod audit;
pub mod auth;
pub mod evidence;
pub mod image;
pub mod ingest;
pub mod ledger;
pub mod orchestrator;
pub mod policy;
pub mod reconciler;
pub mod report;
pub mod scm;
pub mod state;

/// The executors available to this deployment, keyed by kind.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<ExecutorKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    pub fn get(&self, kind: ExecutorKind) -> Result<Arc<dyn Executor>, CoreError> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| PreconditionError::TrainingExecutorDisabled.into())
    }
}

/// The dependency bundle every core operation runs against.
#[derive(Clone)]
pub struct Core {
    pub store: Arc<dyn MetaStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub gate: Arc<dyn DatasetGate>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub executors: ExecutorRegistry,
    pub config: Arc<NodeConfig>,
}

impl Core {
    /// The executor for the configured training backend, or
    /// `training_executor_disabled` when none is configured.
    pub fn training_executor(&self) -> Result<Arc<dyn Executor>, CoreError> {
        let kind = self
            .config
            .training_executor
            .kind()
            .ok_or(PreconditionError::TrainingExecutorDisabled)?;
        self.executors.get(kind)
    }
}
