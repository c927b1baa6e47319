//! The Animus control-plane daemon.
//!
//! Wires the core against the configured executor backend, serves the REST
//! gateway and the telemetry endpoint, and drives the background
//! reconcilers until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;

use animus_api::gate::{DatasetGate, GateError};
use animus_executors::{DockerExecutor, KubernetesExecutor};
use animus_services::reconciler::{EvaluationSyncer, Reconciler};
use animus_services::report::PlainReportRenderer;
use animus_services::{Core, ExecutorRegistry};
use animus_storage::{MemObjectStore, MemStore};
use animus_types::config::{NodeConfig, TrainingExecutor};
use animus_types::dataset::DatasetVersion;

#[derive(Parser, Debug)]
#[command(
    name = "animus-node",
    about = "Governed ML execution control plane",
    version
)]
struct Args {
    /// Skip starting the background reconcilers (API-only mode).
    #[arg(long)]
    no_reconcilers: bool,
}

/// A permissive dataset gate for deployments without a registry: every
/// dataset version is treated as hashed and passing. Production points
/// this at the registry service instead.
struct OpenDatasetGate;

#[async_trait::async_trait]
impl DatasetGate for OpenDatasetGate {
    async fn dataset_version(
        &self,
        dataset_version_id: &str,
    ) -> Result<Option<DatasetVersion>, GateError> {
        Ok(Some(DatasetVersion {
            dataset_id: format!("ds-{dataset_version_id}"),
            dataset_version_id: dataset_version_id.to_string(),
            sha256: animus_types::codec::sha256_hex(dataset_version_id.as_bytes()),
            quality: "pass".to_string(),
        }))
    }
}

async fn build_registry(config: &NodeConfig) -> Result<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    match config.training_executor {
        TrainingExecutor::Docker => {
            let executor = DockerExecutor::connect().context("connecting to docker daemon")?;
            registry = registry.register(Arc::new(executor));
        }
        TrainingExecutor::KubernetesJob => {
            let executor = KubernetesExecutor::connect()
                .await
                .context("connecting to kubernetes")?;
            registry = registry.register(Arc::new(executor));
        }
        TrainingExecutor::Disabled => {
            tracing::warn!("no training executor configured; submissions will be rejected");
        }
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    animus_telemetry::init_tracing()?;
    animus_telemetry::prometheus::install();

    let config = NodeConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(
        listen = %config.listen_addr,
        executor = ?config.training_executor,
        "starting animus-node"
    );

    let registry = build_registry(&config).await?;
    let executor_kind = config.training_executor.kind();

    let core = Core {
        store: Arc::new(MemStore::new()),
        objects: Arc::new(MemObjectStore::new()),
        gate: Arc::new(OpenDatasetGate),
        renderer: Arc::new(PlainReportRenderer),
        executors: registry,
        config: Arc::new(config.clone()),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if let Some(addr) = config.telemetry_addr {
        tasks.push(tokio::spawn(animus_telemetry::http::run_server(
            addr,
            shutdown_rx.clone(),
        )));
    }

    if !args.no_reconcilers {
        if let Some(kind) = executor_kind {
            let reconciler = Reconciler::new(core.clone(), kind);
            tasks.push(tokio::spawn(reconciler.run(shutdown_rx.clone())));
            let syncer = EvaluationSyncer::new(core.clone());
            tasks.push(tokio::spawn(syncer.run(shutdown_rx.clone())));
        }
    }

    let gateway = tokio::spawn(animus_gateway::serve(
        Arc::new(core),
        config.listen_addr,
        shutdown_rx,
    ));

    signal::ctrl_c().await.context("installing ctrl-c handler")?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    gateway.await.context("gateway task")??;
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("animus-node stopped");
    Ok(())
}
