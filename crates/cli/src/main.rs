//! Thin operator CLI over the Animus REST API.
//!
//! Reads `ANIMUS_GATEWAY_URL` and `ANIMUS_AUTH_TOKEN` from the environment
//! (both overridable by flags) and prints API responses as pretty JSON.

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

use client::Gateway;

#[derive(Parser, Debug)]
#[command(name = "animus", about = "Animus control plane CLI", version)]
struct Cli {
    /// Gateway base URL.
    #[arg(long, env = "ANIMUS_GATEWAY_URL", default_value = "http://127.0.0.1:8080")]
    gateway_url: String,
    /// Bearer token for the gateway.
    #[arg(long, env = "ANIMUS_AUTH_TOKEN")]
    auth_token: Option<String>,
    /// Subject to act as (forwarded as identity).
    #[arg(long, env = "ANIMUS_SUBJECT", default_value = "cli")]
    subject: String,
    /// Comma-separated roles to act with.
    #[arg(long, env = "ANIMUS_ROLES")]
    roles: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a run.
    Submit(SubmitArgs),
    /// Evaluate a run spec without persisting anything.
    DryRun(SubmitArgs),
    /// Show one run with its current status.
    Get { run_id: String },
    /// List recent runs.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Cancel a pending run.
    Cancel {
        run_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// List pending approvals.
    Approvals,
    /// Approve a pending approval.
    Approve {
        approval_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Deny a pending approval.
    Deny {
        approval_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Build an evidence bundle for a run.
    Evidence { run_id: String },
    /// Show a run's ledger entry with its checksum.
    Ledger { run_id: String },
}

#[derive(clap::Args, Debug)]
struct SubmitArgs {
    #[arg(long)]
    experiment: String,
    #[arg(long)]
    dataset_version: String,
    #[arg(long)]
    git_repo: String,
    #[arg(long)]
    git_commit: String,
    #[arg(long)]
    git_ref: Option<String>,
    #[arg(long)]
    image: String,
    /// Hyperparameters as a JSON object.
    #[arg(long)]
    params: Option<String>,
    #[arg(long, default_value_t = 0)]
    gpus: u32,
}

impl SubmitArgs {
    fn to_body(&self) -> Result<serde_json::Value> {
        let params: serde_json::Value = match &self.params {
            Some(raw) => serde_json::from_str(raw)?,
            None => json!({}),
        };
        Ok(json!({
            "experiment_id": self.experiment,
            "dataset_version_id": self.dataset_version,
            "git_repo": self.git_repo,
            "git_commit": self.git_commit,
            "git_ref": self.git_ref,
            "image_ref": self.image,
            "params": params,
            "resources": { "gpu_count": self.gpus },
        }))
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let gateway = Gateway::new(
        cli.gateway_url.clone(),
        cli.auth_token.clone(),
        cli.subject.clone(),
        cli.roles.clone(),
    );

    let response = match &cli.command {
        Command::Submit(args) => gateway.post("/api/v1/runs", &args.to_body()?).await?,
        Command::DryRun(args) => gateway.post("/api/v1/runs/dry-run", &args.to_body()?).await?,
        Command::Get { run_id } => gateway.get(&format!("/api/v1/runs/{run_id}")).await?,
        Command::List { limit } => gateway.get(&format!("/api/v1/runs?limit={limit}")).await?,
        Command::Cancel { run_id, reason } => {
            gateway
                .post(
                    &format!("/api/v1/runs/{run_id}/cancel"),
                    &json!({"reason": reason}),
                )
                .await?
        }
        Command::Approvals => gateway.get("/api/v1/approvals").await?,
        Command::Approve { approval_id, reason } => {
            gateway
                .post(
                    &format!("/api/v1/approvals/{approval_id}/approve"),
                    &json!({"reason": reason}),
                )
                .await?
        }
        Command::Deny { approval_id, reason } => {
            gateway
                .post(
                    &format!("/api/v1/approvals/{approval_id}/deny"),
                    &json!({"reason": reason}),
                )
                .await?
        }
        Command::Evidence { run_id } => {
            gateway
                .post(&format!("/api/v1/runs/{run_id}/evidence"), &json!({}))
                .await?
        }
        Command::Ledger { run_id } => gateway.get(&format!("/api/v1/runs/{run_id}/ledger")).await?,
    };

    print_json(&response.body);
    if !response.ok {
        std::process::exit(1);
    }
    Ok(())
}
