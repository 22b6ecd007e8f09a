//! `agentflow` binary entry point (C14, §4.14).
//!
//! Deliberately thin: the prompt-to-subtask slicer is out of scope (§1), so
//! `orchestrate` accepts a pre-sliced subtask list as JSON, falling back to
//! a single trivial subtask built straight from the prompt.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::OrchestratorConfig;
use crate::controller::Controller;
use crate::dispatcher::Dispatcher;
use crate::fallback::FallbackManager;
use crate::keystore::InMemoryKeyStore;
use crate::matcher::Matcher;
use crate::model::{Agent, Priority, Subtask, SubtaskStatus, SubtaskType, Workflow};
use crate::planner::Planner;
use crate::providers::HttpAgentClient;
use crate::reintegration::{execution_levels_from_batches, ReintegrationConfig, Reintegrator};
use crate::state::{StateManager, SubtaskAttemptInfo};
use crate::store::{FileResultStore, ResultStore};
use crate::validator::Validator;

#[derive(Debug, Parser)]
#[command(name = "agentflow", about = "Dependency-aware AI-agent workflow orchestrator")]
pub struct Cli {
    /// Directory backing the durable result store; reused across
    /// `orchestrate`/`status`/`recover` invocations against the same
    /// workflow.
    #[arg(long, global = true, default_value = "./agentflow-data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a workflow to completion and print the reintegrated document.
    Orchestrate {
        /// Used verbatim as the single subtask's prompt when `--subtasks-file` is absent.
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        agents_file: PathBuf,
        #[arg(long)]
        config_file: Option<PathBuf>,
        /// Pre-sliced subtask list as JSON; the slicer itself is out of scope.
        #[arg(long)]
        subtasks_file: Option<PathBuf>,
    },
    /// Print the persisted execution state for a workflow.
    Status { workflow_id: String },
    /// Analyze and apply crash recovery for a halted or interrupted workflow.
    Recover { workflow_id: String },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Orchestrate {
            prompt,
            agents_file,
            config_file,
            subtasks_file,
        } => orchestrate(&cli.data_dir, prompt, &agents_file, config_file.as_deref(), subtasks_file.as_deref()).await,
        Command::Status { workflow_id } => status(&cli.data_dir, &workflow_id).await,
        Command::Recover { workflow_id } => recover(&cli.data_dir, &workflow_id).await,
    }
}

async fn orchestrate(
    data_dir: &Path,
    prompt: Option<String>,
    agents_file: &Path,
    config_file: Option<&Path>,
    subtasks_file: Option<&Path>,
) -> anyhow::Result<()> {
    let config = OrchestratorConfig::load(config_file)?;

    let agents_json = tokio::fs::read_to_string(agents_file).await?;
    let agents: Vec<Agent> = serde_json::from_str(&agents_json)?;

    let subtasks = match subtasks_file {
        Some(path) => {
            let json = tokio::fs::read_to_string(path).await?;
            serde_json::from_str(&json)?
        }
        None => {
            let prompt = prompt.clone().ok_or_else(|| anyhow::anyhow!("either --prompt or --subtasks-file is required"))?;
            vec![Subtask::new("pending", &prompt, &prompt, SubtaskType::Research, Priority::Medium)]
        }
    };

    let mut workflow = Workflow::new(prompt.unwrap_or_default(), subtasks);
    for subtask in &mut workflow.subtasks {
        subtask.workflow_id = workflow.id.clone();
    }

    let store: Arc<dyn ResultStore> = Arc::new(FileResultStore::open(data_dir).await?);
    let key_store = Arc::new(InMemoryKeyStore::new());
    let client = Arc::new(HttpAgentClient::new(key_store));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        client,
        Validator::new(config.validator.clone()),
        config.retry.clone(),
        config.timeout.clone(),
        config.multipass.clone(),
        config.concurrency.max_concurrent_batches,
        config.concurrency.max_concurrent_subtasks,
    ));
    let planner = Planner::new(config.batching.clone());
    let matcher = Matcher::new(config.matcher.clone());
    let fallback = Arc::new(FallbackManager::new(config.fallback.clone()));
    let state_manager = Arc::new(StateManager::new(config.snapshot.max_snapshots, config.snapshot.recovery_timeout_ms));

    let controller = Controller::new(dispatcher, planner, matcher, fallback, store.clone(), state_manager);

    let agent_refs: Vec<&Agent> = agents.iter().collect();
    info!(workflow_id = %workflow.id, subtasks = workflow.subtasks.len(), "starting workflow");
    controller.start_execution(&mut workflow, &agent_refs).await?;

    let plan = Planner::new(config.batching.clone()).plan(&workflow.subtasks)?;
    let execution_levels = execution_levels_from_batches(&plan.batches);
    let data = store.get_reintegration_data(&workflow.id, execution_levels).await?;

    let reintegrator = Reintegrator::new(ReintegrationConfig::default());
    println!("{}", reintegrator.compose(&data, &workflow.subtasks));

    Ok(())
}

async fn status(data_dir: &Path, workflow_id: &str) -> anyhow::Result<()> {
    let store = FileResultStore::open(data_dir).await?;
    match store.load_execution_state(workflow_id).await? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!("no execution state recorded for workflow {workflow_id}"),
    }
    Ok(())
}

async fn recover(data_dir: &Path, workflow_id: &str) -> anyhow::Result<()> {
    let store = FileResultStore::open(data_dir).await?;
    let state = store
        .load_execution_state(workflow_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no execution state recorded for workflow {workflow_id}"))?;

    let results = store.get_by_workflow(workflow_id).await?;
    let mut attempts: std::collections::HashMap<String, SubtaskAttemptInfo> = std::collections::HashMap::new();
    for result in &results {
        let status = if state.completed.contains(&result.subtask_id) {
            SubtaskStatus::Completed
        } else if state.failed.contains(&result.subtask_id) {
            SubtaskStatus::Failed
        } else if state.running.contains(&result.subtask_id) {
            SubtaskStatus::InProgress
        } else {
            SubtaskStatus::Pending
        };
        attempts
            .entry(result.subtask_id.clone())
            .and_modify(|info| {
                info.attempts += 1;
                if result.generated_at > info.last_attempt_at {
                    info.last_attempt_at = result.generated_at;
                }
            })
            .or_insert(SubtaskAttemptInfo {
                subtask_id: result.subtask_id.clone(),
                status,
                last_attempt_at: result.generated_at,
                attempts: 1,
            });
    }

    let snapshot_config = crate::config::SnapshotConfig::default();
    let state_manager = StateManager::new(snapshot_config.max_snapshots, snapshot_config.recovery_timeout_ms);
    state_manager.snapshot(
        &state,
        crate::state::CheckpointData {
            last_successful_batch: None,
            failure_count: state.failed.len(),
            critical_errors: state.error_log.clone(),
        },
    );

    let attempts: Vec<SubtaskAttemptInfo> = attempts.into_values().collect();
    let plan = state_manager
        .analyze_recovery_options(workflow_id, &attempts, Utc::now())
        .ok_or_else(|| anyhow::anyhow!("no snapshot available to recover from"))?;

    println!("{}", serde_json::to_string_pretty(&plan)?);

    let recovered = state_manager.execute_recovery(state, &plan);
    store.save_execution_state(recovered).await?;
    Ok(())
}
