//! `apiflow` CLI entry-point.
//!
//! Subcommands:
//! - `worker`           — start the Job Lifecycle worker loop against a fixtures file.
//! - `execute-node`     — one-shot Node invocation (no Job).
//! - `execute-workflow` — submit and run a Workflow to completion.
//! - `cancel-job`       — submit a Workflow then immediately cancel the resulting Job.
//! - `validate`         — parse a fixtures file and report what it defines.
//!
//! There is no real persistence layer here: each invocation seeds a fresh
//! [`InMemoryRepository`] from a JSON fixtures file (Connectors/Nodes/
//! Workflows). An external HTTP layer fronting a real store is out of scope
//! (spec §6).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use apiflow_config::EngineConfig;
use apiflow_core::{Connector, Node, NodeId, Workflow, WorkflowId};
use apiflow_storage::{InMemoryRepository, Repository};
use apiflow_worker::Worker;
use apiflow_workflow::WorkflowExecutor;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "apiflow", about = "API-centric workflow orchestration engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the worker loop, polling for pending Jobs until Ctrl-C.
    Worker {
        /// JSON file defining the Connectors/Nodes/Workflows to seed.
        #[arg(long)]
        fixtures: PathBuf,
    },
    /// Invoke a single Node through its Connector and print the JSON output.
    ExecuteNode {
        #[arg(long)]
        fixtures: PathBuf,
        #[arg(long)]
        node_id: String,
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Submit a Workflow, run it to completion, and print the finished Job.
    ExecuteWorkflow {
        #[arg(long)]
        fixtures: PathBuf,
        #[arg(long)]
        workflow_id: String,
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Submit a Workflow then immediately cancel the resulting Job.
    CancelJob {
        #[arg(long)]
        fixtures: PathBuf,
        #[arg(long)]
        workflow_id: String,
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Parse a fixtures file and report what it defines, without running anything.
    Validate {
        path: PathBuf,
    },
}

#[derive(Deserialize)]
struct Fixtures {
    #[serde(default)]
    connectors: Vec<Connector>,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    workflows: Vec<Workflow>,
}

impl Fixtures {
    fn load(path: &PathBuf) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixtures file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing fixtures file {}", path.display()))
    }

    fn seed_into(self, repo: &InMemoryRepository) {
        for connector in self.connectors {
            repo.put_connector(connector);
        }
        for node in self.nodes {
            repo.put_node(node);
        }
        for workflow in self.workflows {
            repo.put_workflow(workflow);
        }
    }
}

fn seeded_repo(fixtures: &PathBuf) -> Result<Arc<dyn Repository>> {
    let repo = InMemoryRepository::new();
    Fixtures::load(fixtures)?.seed_into(&repo);
    Ok(Arc::new(repo))
}

#[tokio::main]
async fn main() -> Result<()> {
    apiflow_log::init();
    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("loading engine configuration")?;

    match cli.command {
        Command::Worker { fixtures } => {
            let repo = seeded_repo(&fixtures)?;

            let shutdown = CancellationToken::new();
            let signal_shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("received Ctrl-C, shutting down");
                signal_shutdown.cancel();
            });

            info!(fixtures = %fixtures.display(), "starting worker loop");
            Worker::new(repo, config).run(shutdown).await;
            Ok(())
        }
        Command::ExecuteNode { fixtures, node_id, input } => {
            let repo = seeded_repo(&fixtures)?;
            let node_id = NodeId::parse(&node_id).context("parsing --node-id")?;
            let input = serde_json::from_str(&input).context("parsing --input as JSON")?;

            let output = apiflow_workflow::execute_node(&repo, &config, node_id, input).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Command::ExecuteWorkflow { fixtures, workflow_id, input, name } => {
            let repo = seeded_repo(&fixtures)?;
            let workflow_id = WorkflowId::parse(&workflow_id).context("parsing --workflow-id")?;
            let input = serde_json::from_str(&input).context("parsing --input as JSON")?;

            let workflow = repo.get_workflow(workflow_id).await.context("looking up workflow")?;
            let pending = apiflow_workflow::execute_workflow(&repo, workflow_id, input, name).await;
            let claimed = repo.claim_pending_jobs(1).await;
            let job = claimed
                .into_iter()
                .find(|j| j.id == pending.id)
                .context("job vanished between create and claim")?;

            let executor = WorkflowExecutor::new(Arc::clone(&repo), &config);
            let finished = executor.run(job, &workflow).await;
            println!("{}", serde_json::to_string_pretty(&finished)?);
            Ok(())
        }
        Command::CancelJob { fixtures, workflow_id, input } => {
            let repo = seeded_repo(&fixtures)?;
            let workflow_id = WorkflowId::parse(&workflow_id).context("parsing --workflow-id")?;
            let input = serde_json::from_str(&input).context("parsing --input as JSON")?;

            repo.get_workflow(workflow_id).await.context("looking up workflow")?;
            let pending = apiflow_workflow::execute_workflow(&repo, workflow_id, input, None).await;
            let cancelled = apiflow_workflow::cancel_job(&repo, pending.id).await?;
            println!("{}", serde_json::to_string_pretty(&cancelled)?);
            Ok(())
        }
        Command::Validate { path } => {
            let fixtures = Fixtures::load(&path)?;
            for node in &fixtures.nodes {
                node.validate()
                    .with_context(|| format!("node {} failed validation", node.id))?;
            }
            println!(
                "fixtures ok: {} connector(s), {} node(s), {} workflow(s)",
                fixtures.connectors.len(),
                fixtures.nodes.len(),
                fixtures.workflows.len()
            );
            Ok(())
        }
    }
}
