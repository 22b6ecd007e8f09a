use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::subtask::Subtask;

/// Top-level status of a workflow, tracking the controller's state
/// machine (§4.7): `DRAFT -> PLANNING -> EXECUTING -> terminal`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Draft,
    Planning,
    Executing,
    Completed,
    Failed,
    Halted,
    Paused,
}

/// The top-level orchestrated request, from prompt to final document.
///
/// Subtask slicing itself is out of scope (§1); a `Workflow` is
/// constructed from an already-sliced subtask list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub prompt: String,
    pub subtasks: Vec<Subtask>,
    /// subtask id -> assigned agent id, populated by the matcher (C4).
    pub assignments: std::collections::HashMap<String, String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(prompt: impl Into<String>, subtasks: Vec<Subtask>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            subtasks,
            assignments: std::collections::HashMap::new(),
            status: WorkflowStatus::Draft,
            created_at: Utc::now(),
        }
    }

    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|t| t.id == id)
    }

    pub fn subtask_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|t| t.id == id)
    }
}
