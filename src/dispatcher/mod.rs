//! Concurrent batch/subtask execution under semaphores, timeouts, retries,
//! and multipass re-execution (C6, §4.2, §5).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{MultipassConfig, RetryConfig, TimeoutConfig};
use crate::error::{ErrorKind, ErrorRecord, OrchestratorError};
use crate::model::{Agent, Subtask, SubtaskResult, SubtaskStatus, TokenUsage};
use crate::planner::Batch;
use crate::providers::AgentClient;
use crate::store::ResultStore;
use crate::validator::{ValidationVerdict, Validator};

const MAX_BACKOFF_MS: u64 = 60_000;

/// Outcome of one subtask's full retry/multipass run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskExecutionResult {
    pub subtask_id: String,
    pub status: SubtaskStatus,
    pub result: Option<SubtaskResult>,
    pub retry_count: u32,
    pub error: Option<ErrorRecord>,
    /// Escalated to the controller per §4.7's collapsed halt semantics:
    /// any validator- or timeout-driven `shouldHalt` surfaces here rather
    /// than mutating workflow state directly.
    pub should_halt: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub outcomes: Vec<SubtaskExecutionResult>,
    pub errors: Vec<ErrorRecord>,
}

struct RunningGuard<'a> {
    running: &'a DashMap<String, CancellationToken>,
    subtask_id: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.subtask_id);
    }
}

/// Exclusively owns the running-subtasks map and per-agent semaphore
/// counters (§3 lifecycle ownership, §5 shared resource policy).
pub struct Dispatcher {
    store: Arc<dyn ResultStore>,
    client: Arc<dyn AgentClient>,
    validator: Validator,
    retry_config: RetryConfig,
    timeout_config: TimeoutConfig,
    multipass_config: MultipassConfig,
    max_concurrent_subtasks: usize,
    batch_semaphore: Arc<Semaphore>,
    agent_semaphores: DashMap<String, Arc<Semaphore>>,
    running: DashMap<String, CancellationToken>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ResultStore>,
        client: Arc<dyn AgentClient>,
        validator: Validator,
        retry_config: RetryConfig,
        timeout_config: TimeoutConfig,
        multipass_config: MultipassConfig,
        max_concurrent_batches: usize,
        max_concurrent_subtasks: usize,
    ) -> Self {
        Self {
            store,
            client,
            validator,
            retry_config,
            timeout_config,
            multipass_config,
            max_concurrent_subtasks,
            batch_semaphore: Arc::new(Semaphore::new(max_concurrent_batches)),
            agent_semaphores: DashMap::new(),
            running: DashMap::new(),
        }
    }

    fn agent_semaphore(&self, agent_id: &str) -> Arc<Semaphore> {
        self.agent_semaphores
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_concurrent_subtasks)))
            .clone()
    }

    /// `Cancel(subtaskId)`, §4.2/§5: unwinds the in-flight call via its
    /// cancellation token; the running guard removes the map entry on every
    /// exit path of [`dispatch_subtask`], including this one.
    pub fn cancel(&self, subtask_id: &str) -> bool {
        if let Some(token) = self.running.get(subtask_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// `CancelAll()`, §5: cascades cancellation to every running subtask.
    pub fn cancel_all(&self) {
        for entry in self.running.iter() {
            entry.value().cancel();
        }
    }

    /// `DispatchBatch(batch, agents, workflowId, batchIndex)`, §4.2.
    /// Gated by the global batch semaphore; subtasks run in chunks of
    /// `maxConcurrentSubtasks`, each chunk a parallel fan-out rejoined
    /// before the next chunk starts (§5 ordering guarantees). Takes
    /// `self: &Arc<Self>` so each fanned-out subtask can hold its own
    /// `'static` clone of the dispatcher for `JoinSet`.
    pub async fn dispatch_batch(
        self: &Arc<Self>,
        batch: &Batch,
        assignments: &HashMap<String, Agent>,
        workflow_id: &str,
        batch_index: usize,
    ) -> Result<BatchResult, OrchestratorError> {
        let _permit = self
            .batch_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OrchestratorError::SystemError {
                message: "batch semaphore closed".to_string(),
            })?;

        let batch_id = format!("{workflow_id}::batch-{batch_index}");
        let mut outcomes = Vec::with_capacity(batch.tasks.len());
        let mut errors = Vec::new();

        for chunk in batch.tasks.chunks(self.max_concurrent_subtasks.max(1)) {
            let mut join_set = tokio::task::JoinSet::new();
            for subtask in chunk {
                let Some(agent) = assignments.get(&subtask.id).cloned() else {
                    errors.push(ErrorRecord {
                        kind: ErrorKind::SystemError,
                        message: format!("no agent assigned to subtask {}", subtask.id),
                        subtask_id: Some(subtask.id.clone()),
                        agent_id: None,
                        timestamp: chrono::Utc::now(),
                        retryable: false,
                    });
                    continue;
                };
                let subtask = subtask.clone();
                let batch_id = batch_id.clone();
                let dispatcher = Arc::clone(self);
                // Structured fan-out via `JoinSet` rather than loose spawned
                // tasks: every child is awaited and a panic surfaces as an
                // `Err` in that child's slot instead of poisoning the batch (§5).
                join_set.spawn(async move { dispatcher.dispatch_subtask(&subtask, &agent, &batch_id).await });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(join_err) => errors.push(ErrorRecord {
                        kind: ErrorKind::SystemError,
                        message: format!("subtask task panicked: {join_err}"),
                        subtask_id: None,
                        agent_id: None,
                        timestamp: chrono::Utc::now(),
                        retryable: false,
                    }),
                }
            }
        }

        Ok(BatchResult {
            batch_id,
            outcomes,
            errors,
        })
    }

    /// `DispatchSubtask(subtask, agent, …)`, §4.2: the retry/multipass loop.
    pub async fn dispatch_subtask(
        &self,
        subtask: &Subtask,
        agent: &Agent,
        batch_id: &str,
    ) -> SubtaskExecutionResult {
        let token = CancellationToken::new();
        self.running.insert(subtask.id.clone(), token.clone());
        let _guard = RunningGuard {
            running: &self.running,
            subtask_id: subtask.id.clone(),
        };

        let multipass_active = subtask.metadata.multipass && self.multipass_config.enabled;
        let passes = if multipass_active {
            self.multipass_config.max_passes
        } else {
            self.retry_config.max_retries + 1
        };

        let workflow_id = workflow_id_of(batch_id).to_string();
        let mut best: Option<(SubtaskResult, ValidationVerdict)> = None;
        let mut last_error: Option<ErrorRecord> = None;
        let mut retry_count: u32 = 0;

        for attempt in 0..passes {
            if attempt > 0 {
                let delay_ms = ((self.retry_config.initial_delay_ms as f64)
                    * self.retry_config.backoff_multiplier.powi(attempt as i32 - 1))
                .min(MAX_BACKOFF_MS as f64) as u64;
                retry_count += 1;
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                    _ = token.cancelled() => {
                        return self.cancelled_result(subtask, retry_count);
                    }
                }
            }

            if token.is_cancelled() {
                return self.cancelled_result(subtask, retry_count);
            }

            let semaphore = self.agent_semaphore(&agent.id);
            let permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    last_error = Some(ErrorRecord {
                        kind: ErrorKind::SystemError,
                        message: "agent semaphore closed".to_string(),
                        subtask_id: Some(subtask.id.clone()),
                        agent_id: Some(agent.id.clone()),
                        timestamp: chrono::Utc::now(),
                        retryable: false,
                    });
                    continue;
                }
            };

            let timeout = Duration::from_millis(self.timeout_config.subtask_timeout_ms);
            let prompt = format!("{}\n\n{}", subtask.title, subtask.description);
            let call_result = self
                .client
                .call(subtask, agent, &prompt, timeout, token.child_token())
                .await;
            drop(permit);

            match call_result {
                Err(OrchestratorError::Timeout { message }) => {
                    let error = ErrorRecord {
                        kind: ErrorKind::Timeout,
                        message,
                        subtask_id: Some(subtask.id.clone()),
                        agent_id: Some(agent.id.clone()),
                        timestamp: chrono::Utc::now(),
                        retryable: false,
                    };
                    warn!(subtask_id = %subtask.id, agent_id = %agent.id, "subtask timed out");
                    let failed = self
                        .persist_failure(subtask, agent, &workflow_id, batch_id, vec![error.message.clone()])
                        .await;
                    return SubtaskExecutionResult {
                        subtask_id: subtask.id.clone(),
                        status: SubtaskStatus::Failed,
                        result: failed,
                        retry_count,
                        error: Some(error),
                        should_halt: true,
                    };
                }
                Err(OrchestratorError::Cancelled { .. }) => {
                    return self.cancelled_result(subtask, retry_count);
                }
                Err(api_err) => {
                    let record = api_err.into_record(Some(subtask.id.clone()), Some(agent.id.clone()));
                    self.persist_failure(subtask, agent, &workflow_id, batch_id, vec![record.message.clone()])
                        .await;
                    let exhausted = attempt + 1 >= passes;
                    last_error = Some(record);
                    if exhausted {
                        break;
                    }
                    continue;
                }
                Ok(response) => {
                    let verdict = self.validator.validate(&response.content, &subtask.metadata.validation_rules);
                    let execution_order = self.store.next_execution_order(&workflow_id).await;
                    let failed_messages: Vec<String> = verdict
                        .outcomes
                        .iter()
                        .filter(|o| !o.passed)
                        .map(|o| o.message.clone())
                        .collect();
                    let result = SubtaskResult::new(
                        subtask.id.clone(),
                        agent.id.clone(),
                        response.content.clone(),
                        TokenUsage {
                            prompt_tokens: response.prompt_tokens,
                            completion_tokens: response.completion_tokens,
                        },
                        verdict.confidence,
                        if verdict.passed { Vec::new() } else { failed_messages.clone() },
                        if verdict.passed { failed_messages } else { Vec::new() },
                        execution_order,
                        batch_id.to_string(),
                    );
                    let _ = self.store.save_subtask_result(result.clone()).await;

                    if verdict.passed {
                        info!(subtask_id = %subtask.id, agent_id = %agent.id, "subtask passed validation");
                        return SubtaskExecutionResult {
                            subtask_id: subtask.id.clone(),
                            status: SubtaskStatus::Completed,
                            result: Some(result),
                            retry_count,
                            error: None,
                            should_halt: false,
                        };
                    }

                    if verdict.should_halt {
                        return SubtaskExecutionResult {
                            subtask_id: subtask.id.clone(),
                            status: SubtaskStatus::Failed,
                            result: Some(result),
                            retry_count,
                            error: Some(ErrorRecord {
                                kind: ErrorKind::ValidationError,
                                message: "required validation rule failed".to_string(),
                                subtask_id: Some(subtask.id.clone()),
                                agent_id: Some(agent.id.clone()),
                                timestamp: chrono::Utc::now(),
                                retryable: false,
                            }),
                            should_halt: true,
                        };
                    }

                    let exhausted = attempt + 1 >= passes;
                    if multipass_active {
                        let converged = match &best {
                            None => false,
                            Some((_, best_verdict)) => {
                                (verdict.confidence - best_verdict.confidence).abs()
                                    < self.multipass_config.improvement_threshold
                            }
                        };
                        let is_better = best.as_ref().map(|(_, bv)| verdict.confidence > bv.confidence).unwrap_or(true);
                        if is_better {
                            best = Some((result, verdict));
                        }
                        if converged || exhausted {
                            break;
                        }
                        continue;
                    } else {
                        best = Some((result, verdict.clone()));
                        if !verdict.should_retry || exhausted {
                            break;
                        }
                        continue;
                    }
                }
            }
        }

        match best {
            Some((result, verdict)) => SubtaskExecutionResult {
                subtask_id: subtask.id.clone(),
                status: if verdict.passed {
                    SubtaskStatus::Completed
                } else {
                    SubtaskStatus::Failed
                },
                result: Some(result),
                retry_count,
                error: if verdict.passed {
                    None
                } else {
                    Some(ErrorRecord {
                        kind: ErrorKind::ValidationError,
                        message: "validation did not pass within the retry/pass budget".to_string(),
                        subtask_id: Some(subtask.id.clone()),
                        agent_id: Some(agent.id.clone()),
                        timestamp: chrono::Utc::now(),
                        retryable: false,
                    })
                },
                should_halt: false,
            },
            None => SubtaskExecutionResult {
                subtask_id: subtask.id.clone(),
                status: SubtaskStatus::Failed,
                result: None,
                retry_count,
                error: last_error,
                should_halt: false,
            },
        }
    }

    async fn persist_failure(
        &self,
        subtask: &Subtask,
        agent: &Agent,
        workflow_id: &str,
        batch_id: &str,
        errors: Vec<String>,
    ) -> Option<SubtaskResult> {
        let execution_order = self.store.next_execution_order(workflow_id).await;
        let result = SubtaskResult::new(
            subtask.id.clone(),
            agent.id.clone(),
            String::new(),
            TokenUsage::default(),
            0.0,
            errors,
            Vec::new(),
            execution_order,
            batch_id.to_string(),
        );
        let _ = self.store.save_subtask_result(result.clone()).await;
        Some(result)
    }

    fn cancelled_result(&self, subtask: &Subtask, retry_count: u32) -> SubtaskExecutionResult {
        SubtaskExecutionResult {
            subtask_id: subtask.id.clone(),
            status: SubtaskStatus::Cancelled,
            result: None,
            retry_count,
            error: Some(ErrorRecord {
                kind: ErrorKind::Cancelled,
                message: format!("subtask {} cancelled", subtask.id),
                subtask_id: Some(subtask.id.clone()),
                agent_id: None,
                timestamp: chrono::Utc::now(),
                retryable: false,
            }),
            should_halt: false,
        }
    }
}

fn workflow_id_of(batch_id: &str) -> &str {
    batch_id.split("::").next().unwrap_or(batch_id)
}
