//! Top-level workflow lifecycle state machine and event stream (C9, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{ErrorKind, ErrorRecord, OrchestratorError};
use crate::fallback::FallbackManager;
use crate::matcher::Matcher;
use crate::model::{Agent, ExecutionState, ExecutionStatus, SubtaskStatus, Workflow, WorkflowStatus};
use crate::planner::Planner;
use crate::state::{CheckpointData, StateManager};
use crate::store::ResultStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const BELT_AND_BRACES_POLL_MS: u64 = 100;

/// Edge-triggered control signal delivered over a `tokio::sync::watch`
/// channel rather than a `while paused { sleep(100ms) }` poll loop (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Paused,
    Halted(String),
}

/// The full event taxonomy emitted over the workflow's broadcast stream
/// (§4.7). Subscribers are decoupled: delivery is best-effort, at-most-once
/// per process, and a lagging/dropped subscriber never affects execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerEvent {
    pub workflow_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ControllerEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerEventKind {
    ExecutionStarted,
    ExecutionPaused,
    ExecutionResumed,
    ExecutionHalted { reason: String },
    ExecutionCompleted,
    ExecutionFailed { reason: String },
    BatchStarted { batch_index: usize },
    BatchCompleted { batch_index: usize },
    SubtaskStarted { subtask_id: String },
    SubtaskCompleted { subtask_id: String },
    SubtaskFailed { subtask_id: String, message: String },
    SubtaskRetrying { subtask_id: String, attempt: u32 },
    AgentSwitched { subtask_id: String, from_agent: String, to_agent: String },
}

/// Drives one workflow through `DRAFT -> PLANNING -> EXECUTING -> terminal`.
/// Exclusively mutates workflow-level state (§3 lifecycle ownership); the
/// dispatcher and validator only report recommendations upward.
pub struct Controller {
    dispatcher: Arc<Dispatcher>,
    planner: Planner,
    matcher: Matcher,
    fallback: Arc<FallbackManager>,
    store: Arc<dyn ResultStore>,
    state_manager: Arc<StateManager>,
    event_tx: broadcast::Sender<ControllerEvent>,
    control_tx: watch::Sender<ControlSignal>,
    control_rx: watch::Receiver<ControlSignal>,
}

impl Controller {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        planner: Planner,
        matcher: Matcher,
        fallback: Arc<FallbackManager>,
        store: Arc<dyn ResultStore>,
        state_manager: Arc<StateManager>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = watch::channel(ControlSignal::Run);
        Self {
            dispatcher,
            planner,
            matcher,
            fallback,
            store,
            state_manager,
            event_tx,
            control_tx,
            control_rx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }

    pub fn pause(&self) {
        let _ = self.control_tx.send(ControlSignal::Paused);
    }

    pub fn resume(&self) {
        let _ = self.control_tx.send(ControlSignal::Run);
    }

    /// A workflow-level cancel: cancels every in-flight subtask and refuses
    /// new batches (§5).
    pub fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.dispatcher.cancel_all();
        let _ = self.control_tx.send(ControlSignal::Halted(reason));
    }

    fn emit(&self, workflow_id: &str, kind: ControllerEventKind) {
        // Best-effort broadcast: a send error just means no subscribers are
        // currently listening, which must never interrupt execution.
        let _ = self.event_tx.send(ControllerEvent {
            workflow_id: workflow_id.to_string(),
            timestamp: Utc::now(),
            kind,
        });
    }

    /// `StartExecution(workflow)`, §4.7 steps 1-6.
    pub async fn start_execution(
        &self,
        workflow: &mut Workflow,
        agents: &[&Agent],
    ) -> Result<(), OrchestratorError> {
        workflow.status = WorkflowStatus::Planning;

        let mut state = ExecutionState::new(workflow.id.clone(), workflow.subtasks.len());
        state.status = ExecutionStatus::Running;
        state.started_at = Some(Utc::now());
        self.emit(&workflow.id, ControllerEventKind::ExecutionStarted);

        if workflow.subtasks.is_empty() {
            workflow.status = WorkflowStatus::Completed;
            state.status = ExecutionStatus::Completed;
            state.ended_at = Some(Utc::now());
            let _ = self.store.save_execution_state(state).await;
            self.emit(&workflow.id, ControllerEventKind::ExecutionCompleted);
            return Ok(());
        }

        let plan = match self.planner.plan(&workflow.subtasks) {
            Ok(plan) => plan,
            Err(err) => {
                workflow.status = WorkflowStatus::Failed;
                state.status = ExecutionStatus::Failed;
                state.ended_at = Some(Utc::now());
                let _ = self.store.save_execution_state(state).await;
                self.emit(&workflow.id, ControllerEventKind::ExecutionFailed { reason: err.to_string() });
                return Err(err);
            }
        };

        for edge in &plan.removed_edges {
            info!(workflow_id = %workflow.id, source_id = %edge.source_id, target_id = %edge.target_id, "cycle resolution dropped dependency edge");
        }

        let assignment_ids = self.matcher.assign(&workflow.subtasks, agents);
        workflow.assignments = assignment_ids.clone();
        let agents_by_id: HashMap<&str, &Agent> = agents.iter().map(|a| (a.id.as_str(), *a)).collect();

        workflow.status = WorkflowStatus::Executing;
        let total = workflow.subtasks.len();

        'batches: for (batch_index, batch) in plan.batches.iter().enumerate() {
            if let Some(reason) = self.await_runnable(&workflow.id).await {
                workflow.status = WorkflowStatus::Halted;
                state.status = ExecutionStatus::Halted;
                state.halt_reason = Some(reason);
                break 'batches;
            }

            self.emit(&workflow.id, ControllerEventKind::BatchStarted { batch_index });
            for task in &batch.tasks {
                state.mark_running(&task.id);
                self.emit(&workflow.id, ControllerEventKind::SubtaskStarted { subtask_id: task.id.clone() });
            }

            let mut assignments: HashMap<String, Agent> = HashMap::new();
            for task in &batch.tasks {
                if let Some(agent_id) = assignment_ids.get(&task.id) {
                    if let Some(agent) = agents_by_id.get(agent_id.as_str()) {
                        self.fallback.mark_dispatch_started(agent_id);
                        assignments.insert(task.id.clone(), (*agent).clone());
                    }
                }
            }

            let batch_result = self.dispatcher.dispatch_batch(batch, &assignments, &workflow.id, batch_index).await?;

            let mut halt_reason = None;
            for outcome in &batch_result.outcomes {
                match outcome.status {
                    SubtaskStatus::Completed => {
                        state.mark_completed(&outcome.subtask_id);
                        if let Some(agent_id) = assignment_ids.get(&outcome.subtask_id) {
                            self.fallback.record_success(agent_id, 0.0);
                        }
                        self.emit(
                            &workflow.id,
                            ControllerEventKind::SubtaskCompleted { subtask_id: outcome.subtask_id.clone() },
                        );
                    }
                    SubtaskStatus::Failed | SubtaskStatus::Cancelled => {
                        let record = outcome.error.clone().unwrap_or(ErrorRecord {
                            kind: ErrorKind::SystemError,
                            message: "subtask failed with no recorded error".to_string(),
                            subtask_id: Some(outcome.subtask_id.clone()),
                            agent_id: None,
                            timestamp: Utc::now(),
                            retryable: false,
                        });
                        if let Some(agent_id) = assignment_ids.get(&outcome.subtask_id) {
                            self.fallback.record_failure(agent_id);
                        }
                        self.emit(
                            &workflow.id,
                            ControllerEventKind::SubtaskFailed {
                                subtask_id: outcome.subtask_id.clone(),
                                message: record.message.clone(),
                            },
                        );
                        state.mark_failed(&outcome.subtask_id, record);
                        if outcome.should_halt {
                            halt_reason.get_or_insert_with(|| format!("subtask {} escalated a halt", outcome.subtask_id));
                        }
                    }
                    SubtaskStatus::Pending | SubtaskStatus::Assigned | SubtaskStatus::InProgress => {}
                }
            }
            for err in &batch_result.errors {
                state.error_log.push(err.clone());
            }

            self.emit(&workflow.id, ControllerEventKind::BatchCompleted { batch_index });
            self.snapshot(&workflow.id, &state, batch_index);

            if halt_reason.is_none() && state.failure_ratio() > 0.5 {
                halt_reason = Some("too many failures".to_string());
            }
            if let Some(reason) = halt_reason {
                warn!(workflow_id = %workflow.id, %reason, "halting workflow");
                self.halt(reason.clone());
                workflow.status = WorkflowStatus::Halted;
                state.status = ExecutionStatus::Halted;
                state.halt_reason = Some(reason.clone());
                self.emit(&workflow.id, ControllerEventKind::ExecutionHalted { reason });
                break 'batches;
            }

            let _ = total;
        }

        if workflow.status == WorkflowStatus::Executing {
            workflow.status = WorkflowStatus::Completed;
            state.status = ExecutionStatus::Completed;
            info!(workflow_id = %workflow.id, "workflow completed");
            self.emit(&workflow.id, ControllerEventKind::ExecutionCompleted);
        }
        state.ended_at = Some(Utc::now());
        let _ = self.store.save_execution_state(state).await;

        Ok(())
    }

    /// Waits out a pause (edge-triggered on the watch channel, with a
    /// bounded poll as a belt-and-braces check per §4.7), returning
    /// `Some(reason)` if halted while waiting.
    async fn await_runnable(&self, workflow_id: &str) -> Option<String> {
        let mut control_rx = self.control_rx.clone();
        let mut paused_emitted = false;
        loop {
            match control_rx.borrow().clone() {
                ControlSignal::Run => {
                    if paused_emitted {
                        self.emit(workflow_id, ControllerEventKind::ExecutionResumed);
                    }
                    return None;
                }
                ControlSignal::Halted(reason) => return Some(reason),
                ControlSignal::Paused => {
                    if !paused_emitted {
                        paused_emitted = true;
                        self.emit(workflow_id, ControllerEventKind::ExecutionPaused);
                    }
                    tokio::select! {
                        changed = control_rx.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                        _ = tokio::time::sleep(Duration::from_millis(BELT_AND_BRACES_POLL_MS)) => {}
                    }
                }
            }
        }
    }

    fn snapshot(&self, workflow_id: &str, state: &ExecutionState, batch_index: usize) {
        let checkpoint = CheckpointData {
            last_successful_batch: Some(batch_index),
            failure_count: state.failed.len(),
            critical_errors: state.error_log.clone(),
        };
        self.state_manager.snapshot(state, checkpoint);
        let _ = workflow_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MultipassConfig, RetryConfig, TimeoutConfig};
    use crate::fallback::FallbackConfig;
    use crate::model::{CapabilityCategory, Priority, ProficiencyLevel, Subtask, SubtaskType};
    use crate::planner::BatchingConfig;
    use crate::providers::{AgentClient, AgentResponse};
    use crate::store::InMemoryResultStore;
    use crate::validator::{Validator, ValidatorConfig};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct AlwaysSucceeds;

    #[async_trait]
    impl AgentClient for AlwaysSucceeds {
        async fn call(
            &self,
            _subtask: &crate::model::Subtask,
            _agent: &Agent,
            _prompt: &str,
            _timeout: Duration,
            _cancellation: CancellationToken,
        ) -> Result<AgentResponse, OrchestratorError> {
            Ok(AgentResponse {
                content: "done".to_string(),
                prompt_tokens: 1,
                completion_tokens: 1,
            })
        }
    }

    fn test_controller() -> Controller {
        let store: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::new(AlwaysSucceeds),
            Validator::new(ValidatorConfig::default()),
            RetryConfig::default(),
            TimeoutConfig::default(),
            MultipassConfig::default(),
            2,
            2,
        ));
        Controller::new(
            dispatcher,
            Planner::new(BatchingConfig::default()),
            Matcher::default(),
            Arc::new(FallbackManager::new(FallbackConfig::default())),
            store,
            Arc::new(StateManager::new(50, 300_000)),
        )
    }

    #[tokio::test]
    async fn empty_workflow_completes_immediately() {
        let controller = test_controller();
        let mut workflow = Workflow::new("p", vec![]);
        let agents: Vec<&Agent> = vec![];
        controller.start_execution(&mut workflow, &agents).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn happy_path_completes_with_all_subtasks_done() {
        let controller = test_controller();
        let task = Subtask::new("wf", "t", "d", SubtaskType::Research, Priority::Medium);
        let mut workflow = Workflow::new("p", vec![task]);
        let agent = Agent::new("a1", "A1", "custom").with_capability(CapabilityCategory::Research, ProficiencyLevel::Expert);
        let agents = vec![&agent];
        controller.start_execution(&mut workflow, &agents).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn subscriber_receives_execution_started_and_completed() {
        let controller = test_controller();
        let mut rx = controller.subscribe();
        let mut workflow = Workflow::new("p", vec![]);
        let agents: Vec<&Agent> = vec![];
        controller.start_execution(&mut workflow, &agents).await.unwrap();

        let first = rx.try_recv().unwrap();
        assert!(matches!(first.kind, ControllerEventKind::ExecutionStarted));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second.kind, ControllerEventKind::ExecutionCompleted));
    }
}
