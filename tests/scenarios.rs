//! End-to-end scenario tests driving the controller, dispatcher, planner,
//! matcher, fallback manager, and state manager together.
//!
//! No real HTTP calls are made; each scenario supplies a scripted
//! `AgentClient` standing in for the outbound agent API, matching the
//! teacher's own "no external API calls; all execution is simulated"
//! integration-test style.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agentflow::config::{MultipassConfig, RetryConfig, TimeoutConfig};
use agentflow::controller::Controller;
use agentflow::dispatcher::Dispatcher;
use agentflow::error::OrchestratorError;
use agentflow::fallback::{FallbackConfig, FallbackManager};
use agentflow::matcher::Matcher;
use agentflow::model::{
    Agent, CapabilityCategory, DependencyKind, ExecutionStatus, Priority, ProficiencyLevel,
    Subtask, SubtaskStatus, SubtaskType, Workflow, WorkflowStatus,
};
use agentflow::planner::{BatchingConfig, Planner};
use agentflow::providers::{AgentClient, AgentResponse};
use agentflow::state::StateManager;
use agentflow::store::{InMemoryResultStore, ResultStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A scripted client that looks up a canned response sequence by agent id;
/// each call to a given agent advances that agent's own cursor.
struct ScriptedClient {
    scripts: HashMap<String, Vec<Result<&'static str, OrchestratorError>>>,
    cursors: HashMap<String, AtomicUsize>,
}

impl ScriptedClient {
    fn new(scripts: HashMap<String, Vec<Result<&'static str, OrchestratorError>>>) -> Self {
        let cursors = scripts.keys().map(|k| (k.clone(), AtomicUsize::new(0))).collect();
        Self { scripts, cursors }
    }
}

#[async_trait]
impl AgentClient for ScriptedClient {
    async fn call(
        &self,
        _subtask: &Subtask,
        agent: &Agent,
        _prompt: &str,
        _timeout: Duration,
        _cancellation: CancellationToken,
    ) -> Result<AgentResponse, OrchestratorError> {
        let script = self
            .scripts
            .get(&agent.id)
            .unwrap_or_else(|| panic!("no script registered for agent {}", agent.id));
        let cursor = &self.cursors[&agent.id];
        let idx = cursor.fetch_add(1, Ordering::SeqCst).min(script.len() - 1);
        match &script[idx] {
            Ok(content) => Ok(AgentResponse {
                content: content.to_string(),
                prompt_tokens: 5,
                completion_tokens: 5,
            }),
            Err(e) => Err(e.clone()),
        }
    }
}

fn expert(id: &str, category: CapabilityCategory) -> Agent {
    Agent::new(id, id, "custom").with_capability(category, ProficiencyLevel::Expert)
}

struct Harness {
    controller: Controller,
    store: Arc<dyn ResultStore>,
}

fn harness(client: Arc<dyn AgentClient>) -> Harness {
    harness_with_retry(client, RetryConfig { max_retries: 3, backoff_multiplier: 2.0, initial_delay_ms: 1 })
}

fn harness_with_retry(client: Arc<dyn AgentClient>, retry: RetryConfig) -> Harness {
    let store: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        client,
        agentflow::validator::Validator::new(agentflow::validator::ValidatorConfig::default()),
        retry,
        TimeoutConfig { subtask_timeout_ms: 2000, batch_timeout_ms: 60_000 },
        MultipassConfig::default(),
        4,
        4,
    ));
    let controller = Controller::new(
        dispatcher,
        Planner::new(BatchingConfig::default()),
        Matcher::default(),
        Arc::new(FallbackManager::new(FallbackConfig::default())),
        store.clone(),
        Arc::new(StateManager::new(50, 300_000)),
    );
    Harness { controller, store }
}

// ---------------------------------------------------------------------------
// S1 -- happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_happy_path_three_dependent_subtasks_complete_in_order() {
    let a = Subtask::new("wf", "research the topic", "d", SubtaskType::Research, Priority::Medium);
    let b = Subtask::new("wf", "analyze findings", "d", SubtaskType::Analysis, Priority::Medium)
        .with_dependency(a.id.clone(), DependencyKind::Blocking);
    let c = Subtask::new("wf", "write it up", "d", SubtaskType::Creation, Priority::Medium)
        .with_dependency(b.id.clone(), DependencyKind::Blocking);

    let x = expert("x", CapabilityCategory::Research).with_capability(CapabilityCategory::Analysis, ProficiencyLevel::Expert);
    let y = expert("y", CapabilityCategory::Creation);

    // The matcher's load-spreading rule may route any of the three subtasks
    // to either agent (it prefers an unassigned agent over the best-scoring
    // one once an agent is already in use), so each agent gets enough
    // scripted slots to cover being picked more than once.
    let mut scripts = HashMap::new();
    scripts.insert("x".to_string(), vec![Ok("done"), Ok("done"), Ok("done")]);
    scripts.insert("y".to_string(), vec![Ok("done"), Ok("done"), Ok("done")]);
    let client = Arc::new(ScriptedClient::new(scripts));

    let h = harness(client);
    let mut workflow = Workflow::new("write a report", vec![a.clone(), b.clone(), c.clone()]);
    let agents = vec![&x, &y];
    h.controller.start_execution(&mut workflow, &agents).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Completed);

    let results = h.store.get_by_workflow(&workflow.id).await.unwrap();
    assert_eq!(results.iter().filter(|r| !r.content.is_empty()).count(), 3);

    // batches respected dependency order: A's batch index < B's < C's.
    let by_subtask = |id: &str| results.iter().find(|r| r.subtask_id == id).unwrap().batch_id.clone();
    assert!(by_subtask(&a.id) < by_subtask(&b.id));
    assert!(by_subtask(&b.id) < by_subtask(&c.id));
}

// ---------------------------------------------------------------------------
// S2 -- cycle resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s2_cycle_is_resolved_before_planning_completes() {
    let p = Subtask::new("wf", "P", "d", SubtaskType::Research, Priority::Medium);
    let q = Subtask::new("wf", "Q", "d", SubtaskType::Research, Priority::Medium)
        .with_dependency(p.id.clone(), DependencyKind::Blocking);
    let p = p.with_dependency(q.id.clone(), DependencyKind::Soft);

    let planner = Planner::new(BatchingConfig::default());
    let plan = planner.plan(&[p.clone(), q.clone()]).unwrap();

    assert_eq!(plan.cycle_report.cycles.len(), 1);
    assert_eq!(plan.batches.len(), 2);
    // P -> Q was SOFT (criticality 3 + medium 3 = 6) vs Q -> P BLOCKING
    // (criticality 10 + medium 3 = 13); the soft edge is removed, so P runs
    // before Q.
    assert_eq!(plan.batches[0].tasks[0].id, p.id);
    assert_eq!(plan.batches[1].tasks[0].id, q.id);
}

// ---------------------------------------------------------------------------
// S3 -- retry then success
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s3_retry_then_success_persists_two_failures_and_one_completion() {
    let subtask = Subtask::new("wf", "flaky task", "d", SubtaskType::Research, Priority::Medium);
    let agent = expert("x", CapabilityCategory::Research);

    let mut scripts = HashMap::new();
    scripts.insert(
        "x".to_string(),
        vec![
            Err(OrchestratorError::ApiError { message: "503".into() }),
            Err(OrchestratorError::ApiError { message: "503".into() }),
            Ok("final answer"),
        ],
    );
    let client = Arc::new(ScriptedClient::new(scripts));
    let h = harness(client);

    let mut workflow = Workflow::new("p", vec![subtask.clone()]);
    let agents = vec![&agent];
    h.controller.start_execution(&mut workflow, &agents).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Completed);

    let results = h.store.get_by_subtask(&subtask.id).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|r| r.content.is_empty()).count(), 2);
    assert_eq!(results.iter().filter(|r| !r.content.is_empty()).count(), 1);

    // executionOrder is monotonic per workflow.
    let mut orders: Vec<u64> = results.iter().map(|r| r.execution_order).collect();
    orders.sort_unstable();
    assert_eq!(orders, vec![0, 1, 2]);
}

// ---------------------------------------------------------------------------
// S4 -- circuit breaker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s4_five_consecutive_failures_open_the_circuit_and_exclude_the_agent() {
    let manager = FallbackManager::new(FallbackConfig::default());
    for _ in 0..5 {
        manager.record_failure("x");
    }
    let health = manager.health_snapshot("x").unwrap();
    assert_eq!(health.status, agentflow::model::HealthStatus::CircuitOpen);
    assert!(health.circuit_breaker_open_until.is_some());

    let x = expert("x", CapabilityCategory::Research);
    let y = expert("y", CapabilityCategory::Research);
    let subtask = Subtask::new("wf", "t", "d", SubtaskType::Research, Priority::Medium);
    let selected = manager.select_agent(&subtask, &[&x, &y], &Default::default());
    assert_eq!(selected.unwrap().id, "y");
}

// ---------------------------------------------------------------------------
// S5 -- halt on failure rate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s5_halts_the_instant_failure_ratio_exceeds_half() {
    let tasks: Vec<Subtask> = (0..4)
        .map(|i| Subtask::new("wf", format!("t{i}"), "d", SubtaskType::Research, Priority::Medium))
        .collect();
    let agent = expert("x", CapabilityCategory::Research);

    // 3 of 4 subtasks get a permanent 401 (non-retryable by construction:
    // retries run out and validator never sees a passing call); 1 succeeds.
    let mut scripts = HashMap::new();
    scripts.insert(
        "x".to_string(),
        vec![
            Err(OrchestratorError::ApiError { message: "401".into() }),
            Err(OrchestratorError::ApiError { message: "401".into() }),
            Err(OrchestratorError::ApiError { message: "401".into() }),
            Ok("ok"),
        ],
    );
    let client = Arc::new(ScriptedClient::new(scripts));
    // max_retries = 0 so a single 401 exhausts that subtask's attempts,
    // keeping the scripted cursor aligned 1:1 with subtasks.
    let h = harness_with_retry(client, RetryConfig { max_retries: 0, backoff_multiplier: 1.0, initial_delay_ms: 1 });

    let mut workflow = Workflow::new("p", tasks);
    let agents = vec![&agent];
    h.controller.start_execution(&mut workflow, &agents).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Halted);
}

// ---------------------------------------------------------------------------
// S6 -- snapshot & resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s6_recovery_plan_resumes_running_and_restarts_the_rest() {
    let state_manager = StateManager::new(50, 300_000);
    let mut state = agentflow::model::ExecutionState::new("wf1", 5);
    state.mark_completed("s1");
    state.mark_completed("s2");
    state.mark_running("s3");

    state_manager.snapshot(
        &state,
        agentflow::state::CheckpointData {
            last_successful_batch: Some(1),
            failure_count: 0,
            critical_errors: vec![],
        },
    );

    let now = chrono::Utc::now();
    let attempts = vec![
        agentflow::state::SubtaskAttemptInfo {
            subtask_id: "s1".into(),
            status: SubtaskStatus::Completed,
            last_attempt_at: now,
            attempts: 1,
        },
        agentflow::state::SubtaskAttemptInfo {
            subtask_id: "s2".into(),
            status: SubtaskStatus::Completed,
            last_attempt_at: now,
            attempts: 1,
        },
        agentflow::state::SubtaskAttemptInfo {
            subtask_id: "s3".into(),
            status: SubtaskStatus::InProgress,
            last_attempt_at: now,
            attempts: 1,
        },
        agentflow::state::SubtaskAttemptInfo {
            subtask_id: "s4".into(),
            status: SubtaskStatus::Pending,
            last_attempt_at: now,
            attempts: 0,
        },
        agentflow::state::SubtaskAttemptInfo {
            subtask_id: "s5".into(),
            status: SubtaskStatus::Pending,
            last_attempt_at: now,
            attempts: 0,
        },
    ];

    let plan = state_manager.analyze_recovery_options("wf1", &attempts, now).unwrap();
    assert_eq!(plan.strategy, agentflow::state::RecoveryStrategy::Resume);

    let action_for = |id: &str| plan.per_subtask.iter().find(|r| r.subtask_id == id).unwrap().action;
    assert_eq!(action_for("s1"), agentflow::state::RecoveryAction::Skip);
    assert_eq!(action_for("s2"), agentflow::state::RecoveryAction::Skip);
    assert_eq!(action_for("s3"), agentflow::state::RecoveryAction::Resume);
    assert_eq!(action_for("s4"), agentflow::state::RecoveryAction::Restart);
    assert_eq!(action_for("s5"), agentflow::state::RecoveryAction::Restart);

    let recovered = state_manager.execute_recovery(state, &plan);
    assert_eq!(recovered.status, ExecutionStatus::Running);
    // the two already-completed subtasks are untouched by recovery.
    assert!(recovered.completed.contains("s1"));
    assert!(recovered.completed.contains("s2"));
    // the resumed subtask stays in the running set, not duplicated elsewhere.
    assert!(recovered.running.contains("s3"));
    assert!(!recovered.completed.contains("s3") && !recovered.failed.contains("s3"));
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_workflow_completes_immediately() {
    let client = Arc::new(ScriptedClient::new(HashMap::new()));
    let h = harness(client);
    let mut workflow = Workflow::new("p", vec![]);
    let agents: Vec<&Agent> = vec![];
    h.controller.start_execution(&mut workflow, &agents).await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn single_subtask_workflow_with_only_circuit_open_agents_halts() {
    let agent = expert("x", CapabilityCategory::Research);
    let fallback = FallbackManager::new(FallbackConfig::default());
    for _ in 0..5 {
        fallback.record_failure("x");
    }
    let subtask = Subtask::new("wf", "t", "d", SubtaskType::Research, Priority::Medium);
    let selected = fallback.select_agent(&subtask, &[&agent], &Default::default());
    assert!(selected.is_none(), "circuit-open agent must never be selected");
}
