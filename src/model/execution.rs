use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::ErrorRecord;

/// Workflow-level execution status (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Halted,
    Paused,
}

/// `progress.completed + progress.failed + progress.inProgress <= progress.total` (§3 invariant).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
}

impl ProgressCounters {
    pub fn is_consistent(&self) -> bool {
        self.completed + self.failed + self.in_progress <= self.total
    }
}

/// Execution-time state for one workflow run. Mutated exclusively by the
/// controller (§3 lifecycle ownership); the dispatcher mutates per-subtask
/// running entries through its own running-subtasks map, not this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub running: HashSet<String>,
    pub completed: HashSet<String>,
    pub failed: HashSet<String>,
    pub retry_counts: HashMap<String, u32>,
    pub error_log: Vec<ErrorRecord>,
    pub progress: ProgressCounters,
    pub halt_reason: Option<String>,
}

impl ExecutionState {
    pub fn new(workflow_id: impl Into<String>, total_subtasks: usize) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            started_at: None,
            ended_at: None,
            running: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            retry_counts: HashMap::new(),
            error_log: Vec::new(),
            progress: ProgressCounters {
                total: total_subtasks,
                ..Default::default()
            },
            halt_reason: None,
        }
    }

    /// §3 invariant: a subtask id appears in at most one of
    /// {running, completed, failed} at any instant.
    pub fn mark_running(&mut self, subtask_id: &str) {
        self.completed.remove(subtask_id);
        self.failed.remove(subtask_id);
        self.running.insert(subtask_id.to_string());
        self.recompute_progress();
    }

    pub fn mark_completed(&mut self, subtask_id: &str) {
        self.running.remove(subtask_id);
        self.failed.remove(subtask_id);
        self.completed.insert(subtask_id.to_string());
        self.recompute_progress();
    }

    pub fn mark_failed(&mut self, subtask_id: &str, error: ErrorRecord) {
        self.running.remove(subtask_id);
        self.completed.remove(subtask_id);
        self.failed.insert(subtask_id.to_string());
        self.error_log.push(error);
        self.recompute_progress();
    }

    fn recompute_progress(&mut self) {
        self.progress.in_progress = self.running.len();
        self.progress.completed = self.completed.len();
        self.progress.failed = self.failed.len();
    }

    /// Failure ratio over the declared total, used by the controller's
    /// >50%-failure halt rule (§4.7).
    pub fn failure_ratio(&self) -> f64 {
        if self.progress.total == 0 {
            0.0
        } else {
            self.failed.len() as f64 / self.progress.total as f64
        }
    }

    pub fn increment_retry(&mut self, subtask_id: &str) -> u32 {
        let count = self.retry_counts.entry(subtask_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}
