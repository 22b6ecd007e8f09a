//! Periodic snapshotting and crash-recovery planning (C8, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{ErrorKind, ErrorRecord};
use crate::model::{ExecutionState, SubtaskStatus};

/// Checkpoint data carried alongside the raw execution state copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub last_successful_batch: Option<usize>,
    pub failure_count: usize,
    pub critical_errors: Vec<ErrorRecord>,
}

/// A deep, immutable copy of a workflow's execution state at one instant,
/// per §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub workflow_id: String,
    pub taken_at: DateTime<Utc>,
    pub state: ExecutionState,
    pub checkpoint: CheckpointData,
}

/// Classification of one subtask under `AnalyzeRecoveryOptions`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryAction {
    Skip,
    Resume,
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskRecovery {
    pub subtask_id: String,
    pub action: RecoveryAction,
}

/// Overall recovery strategy chosen from the per-subtask classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    Resume,
    Partial,
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub workflow_id: String,
    pub strategy: RecoveryStrategy,
    pub per_subtask: Vec<SubtaskRecovery>,
}

/// Per-subtask bookkeeping the state manager needs beyond what
/// `ExecutionState` already tracks: the last attempt time (for the
/// RUNNING-within-`recoveryTimeout` check) and total attempt count (for the
/// FAILED-under-3-attempts check), since neither is owned by `ExecutionState`
/// itself (§3 lifecycle ownership keeps that with the dispatcher).
#[derive(Debug, Clone)]
pub struct SubtaskAttemptInfo {
    pub subtask_id: String,
    pub status: SubtaskStatus,
    pub last_attempt_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Ring-buffered snapshot history plus recovery planning, per §4.6.
pub struct StateManager {
    max_snapshots: usize,
    recovery_timeout_ms: i64,
    snapshots: Mutex<std::collections::HashMap<String, VecDeque<Snapshot>>>,
}

impl StateManager {
    pub fn new(max_snapshots: usize, recovery_timeout_ms: i64) -> Self {
        Self {
            max_snapshots,
            recovery_timeout_ms,
            snapshots: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Takes a fresh snapshot and pushes it onto the workflow's ring buffer,
    /// evicting the oldest entry once `maxSnapshots` is exceeded.
    pub fn snapshot(&self, state: &ExecutionState, checkpoint: CheckpointData) -> Snapshot {
        let snapshot = Snapshot {
            workflow_id: state.workflow_id.clone(),
            taken_at: Utc::now(),
            state: state.clone(),
            checkpoint,
        };
        let mut snapshots = self.snapshots.lock().unwrap();
        let ring = snapshots.entry(state.workflow_id.clone()).or_default();
        ring.push_back(snapshot.clone());
        while ring.len() > self.max_snapshots {
            ring.pop_front();
        }
        snapshot
    }

    pub fn latest(&self, workflow_id: &str) -> Option<Snapshot> {
        self.snapshots.lock().unwrap().get(workflow_id).and_then(|ring| ring.back().cloned())
    }

    pub fn history(&self, workflow_id: &str) -> Vec<Snapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .get(workflow_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// `AnalyzeRecoveryOptions(workflowId) → RecoveryPlan`, per §4.6's exact
    /// classification rules.
    pub fn analyze_recovery_options(&self, workflow_id: &str, attempts: &[SubtaskAttemptInfo], now: DateTime<Utc>) -> Option<RecoveryPlan> {
        let snapshot = self.latest(workflow_id)?;

        let mut per_subtask = Vec::with_capacity(attempts.len());
        for info in attempts {
            let action = match info.status {
                SubtaskStatus::Completed => RecoveryAction::Skip,
                SubtaskStatus::InProgress => {
                    let elapsed_ms = (now - info.last_attempt_at).num_milliseconds();
                    if elapsed_ms < self.recovery_timeout_ms {
                        RecoveryAction::Resume
                    } else {
                        RecoveryAction::Restart
                    }
                }
                SubtaskStatus::Failed => {
                    if info.attempts < 3 {
                        RecoveryAction::Restart
                    } else {
                        RecoveryAction::Skip
                    }
                }
                SubtaskStatus::Pending | SubtaskStatus::Assigned | SubtaskStatus::Cancelled => RecoveryAction::Restart,
            };
            per_subtask.push(SubtaskRecovery {
                subtask_id: info.subtask_id.clone(),
                action,
            });
        }

        let resumable = per_subtask.iter().filter(|r| r.action == RecoveryAction::Resume).count();
        let restartable = per_subtask.iter().filter(|r| r.action == RecoveryAction::Restart).count();
        let skipped = per_subtask.iter().filter(|r| r.action == RecoveryAction::Skip).count();
        let total = per_subtask.len().max(1);

        let strategy = if resumable > restartable {
            RecoveryStrategy::Resume
        } else if (skipped as f64 / total as f64) < 0.5 {
            RecoveryStrategy::Partial
        } else {
            RecoveryStrategy::Restart
        };

        let _ = snapshot;
        Some(RecoveryPlan {
            workflow_id: workflow_id.to_string(),
            strategy,
            per_subtask,
        })
    }

    /// `ExecuteRecovery`: mutates the loaded state per plan, sets RUNNING,
    /// appends a synthetic `RECOVERY` error entry, and snapshots the result.
    pub fn execute_recovery(&self, mut state: ExecutionState, plan: &RecoveryPlan) -> ExecutionState {
        for recovery in &plan.per_subtask {
            match recovery.action {
                RecoveryAction::Skip => {}
                RecoveryAction::Resume => state.mark_running(&recovery.subtask_id),
                RecoveryAction::Restart => {
                    state.running.remove(&recovery.subtask_id);
                    state.completed.remove(&recovery.subtask_id);
                    state.failed.remove(&recovery.subtask_id);
                }
            }
        }
        state.status = crate::model::ExecutionStatus::Running;
        state.error_log.push(ErrorRecord {
            kind: ErrorKind::RecoveryError,
            message: format!("recovered workflow {} with strategy {:?}", state.workflow_id, plan.strategy),
            subtask_id: None,
            agent_id: None,
            timestamp: Utc::now(),
            retryable: false,
        });

        self.snapshot(
            &state,
            CheckpointData {
                last_successful_batch: None,
                failure_count: state.failed.len(),
                critical_errors: state.error_log.clone(),
            },
        );

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(id: &str, status: SubtaskStatus, minutes_ago: i64, attempts: u32) -> SubtaskAttemptInfo {
        SubtaskAttemptInfo {
            subtask_id: id.to_string(),
            status,
            last_attempt_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            attempts,
        }
    }

    #[test]
    fn completed_subtasks_are_skipped() {
        let manager = StateManager::new(50, 300_000);
        let state = ExecutionState::new("wf1", 1);
        manager.snapshot(&state, CheckpointData { last_successful_batch: None, failure_count: 0, critical_errors: vec![] });

        let attempts = vec![attempt("s1", SubtaskStatus::Completed, 1, 1)];
        let plan = manager.analyze_recovery_options("wf1", &attempts, Utc::now()).unwrap();
        assert_eq!(plan.per_subtask[0].action, RecoveryAction::Skip);
    }

    #[test]
    fn stale_running_subtask_restarts() {
        let manager = StateManager::new(50, 60_000);
        let state = ExecutionState::new("wf1", 1);
        manager.snapshot(&state, CheckpointData { last_successful_batch: None, failure_count: 0, critical_errors: vec![] });

        let attempts = vec![attempt("s1", SubtaskStatus::InProgress, 5, 1)];
        let plan = manager.analyze_recovery_options("wf1", &attempts, Utc::now()).unwrap();
        assert_eq!(plan.per_subtask[0].action, RecoveryAction::Restart);
    }

    #[test]
    fn fresh_running_subtask_resumes() {
        let manager = StateManager::new(50, 300_000);
        let state = ExecutionState::new("wf1", 1);
        manager.snapshot(&state, CheckpointData { last_successful_batch: None, failure_count: 0, critical_errors: vec![] });

        let attempts = vec![attempt("s1", SubtaskStatus::InProgress, 1, 1)];
        let plan = manager.analyze_recovery_options("wf1", &attempts, Utc::now()).unwrap();
        assert_eq!(plan.per_subtask[0].action, RecoveryAction::Resume);
    }

    #[test]
    fn failed_under_three_attempts_restarts_over_three_skips() {
        let manager = StateManager::new(50, 300_000);
        let state = ExecutionState::new("wf1", 2);
        manager.snapshot(&state, CheckpointData { last_successful_batch: None, failure_count: 0, critical_errors: vec![] });

        let attempts = vec![attempt("s1", SubtaskStatus::Failed, 1, 2), attempt("s2", SubtaskStatus::Failed, 1, 3)];
        let plan = manager.analyze_recovery_options("wf1", &attempts, Utc::now()).unwrap();
        assert_eq!(plan.per_subtask[0].action, RecoveryAction::Restart);
        assert_eq!(plan.per_subtask[1].action, RecoveryAction::Skip);
    }

    #[test]
    fn ring_buffer_caps_at_max_snapshots() {
        let manager = StateManager::new(2, 300_000);
        let state = ExecutionState::new("wf1", 1);
        for _ in 0..5 {
            manager.snapshot(&state, CheckpointData { last_successful_batch: None, failure_count: 0, critical_errors: vec![] });
        }
        assert_eq!(manager.history("wf1").len(), 2);
    }

    #[test]
    fn execute_recovery_sets_running_and_logs_a_recovery_error() {
        let manager = StateManager::new(50, 300_000);
        let mut state = ExecutionState::new("wf1", 1);
        state.mark_running("s1");
        manager.snapshot(&state, CheckpointData { last_successful_batch: None, failure_count: 0, critical_errors: vec![] });

        let plan = RecoveryPlan {
            workflow_id: "wf1".into(),
            strategy: RecoveryStrategy::Resume,
            per_subtask: vec![SubtaskRecovery { subtask_id: "s1".into(), action: RecoveryAction::Resume }],
        };
        let recovered = manager.execute_recovery(state, &plan);
        assert_eq!(recovered.status, crate::model::ExecutionStatus::Running);
        assert!(recovered.error_log.iter().any(|e| e.kind == ErrorKind::RecoveryError));
    }
}
