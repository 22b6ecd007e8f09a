use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::SubtaskResult;

/// Category of work a subtask represents. Drives both the agent-matcher's
/// capability scoring and the dispatcher's default duration estimates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskType {
    Research,
    Analysis,
    Creation,
    Validation,
}

impl SubtaskType {
    /// Default estimated duration in minutes, per §4.4.
    pub fn default_duration_minutes(self) -> f64 {
        match self {
            SubtaskType::Research => 20.0,
            SubtaskType::Analysis => 15.0,
            SubtaskType::Creation => 30.0,
            SubtaskType::Validation => 10.0,
        }
    }
}

/// Subtask priority. `Ord` follows declaration order so that
/// `Critical > High > Medium > Low`, matching the planner's
/// `(-priority, createdAt, id)` ordering key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Contribution to cycle-edge criticality scoring, per §4.1.
    pub fn criticality_contribution(self) -> u32 {
        match self {
            Priority::Critical | Priority::High => 5,
            Priority::Medium => 3,
            Priority::Low => 1,
        }
    }
}

/// Lifecycle status of a subtask. Transitions are restricted to
/// `PENDING -> ASSIGNED -> IN_PROGRESS -> {COMPLETED, FAILED, CANCELLED}`
/// (§8 invariant 2); see [`SubtaskStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl SubtaskStatus {
    pub fn can_transition_to(self, next: SubtaskStatus) -> bool {
        use SubtaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Assigned, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                // Allow direct pending/assigned cancellation (e.g. CancelAll on
                // a subtask that never reached IN_PROGRESS).
                | (Pending, Cancelled)
                | (Assigned, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubtaskStatus::Completed | SubtaskStatus::Failed | SubtaskStatus::Cancelled
        )
    }
}

/// Kind of dependency edge between two subtasks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyKind {
    Blocking,
    Soft,
}

impl DependencyKind {
    /// Base criticality score used by cycle resolution, per §4.1.
    pub fn criticality_base(self) -> u32 {
        match self {
            DependencyKind::Blocking => 10,
            DependencyKind::Soft => 3,
        }
    }
}

/// A dependency edge from the owning subtask to `target`.
///
/// Edges are stored as plain `{target_id, kind}` values keyed into the
/// workflow's subtask table rather than object references, avoiding
/// cyclic back-references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyEdge {
    pub target_id: String,
    pub kind: DependencyKind,
}

/// Recognized validation configuration keys for a subtask.
///
/// A tagged struct rather than a dynamic metadata bag: enumerates the
/// keys the system actually interprets
/// (multipass opt-in, per-subtask model override) plus an explicit escape
/// hatch for opaque caller-supplied JSON that passes through unexamined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtaskMetadata {
    /// Opt into multipass execution for this subtask (§4.2 step 1).
    #[serde(default)]
    pub multipass: bool,

    /// Override the agent's default model for this subtask only.
    #[serde(default)]
    pub model_override: Option<String>,

    /// Validation rules to run against this subtask's output.
    #[serde(default)]
    pub validation_rules: Vec<crate::validator::Rule>,

    /// Opaque caller-supplied fields not otherwise recognized. Included in
    /// the planner's token-size estimate but never interpreted.
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// The atomic unit of agent work within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub subtask_type: SubtaskType,
    pub priority: Priority,
    pub status: SubtaskStatus,
    pub dependencies: Vec<DependencyEdge>,
    pub result: Option<SubtaskResult>,
    pub estimated_duration_minutes: Option<f64>,
    pub assigned_agent_id: Option<String>,
    pub workflow_id: String,
    pub metadata: SubtaskMetadata,
    pub created_at: DateTime<Utc>,
}

impl Subtask {
    pub fn new(
        workflow_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        subtask_type: SubtaskType,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            subtask_type,
            priority,
            status: SubtaskStatus::Pending,
            dependencies: Vec::new(),
            result: None,
            estimated_duration_minutes: None,
            assigned_agent_id: None,
            workflow_id: workflow_id.into(),
            metadata: SubtaskMetadata::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_dependency(mut self, target_id: impl Into<String>, kind: DependencyKind) -> Self {
        self.dependencies.push(DependencyEdge {
            target_id: target_id.into(),
            kind,
        });
        self
    }

    pub fn blocking_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|e| e.kind == DependencyKind::Blocking)
            .map(|e| e.target_id.as_str())
    }

    /// Attempt a status transition, enforcing §8 invariant 2.
    pub fn transition(&mut self, next: SubtaskStatus) -> Result<(), crate::error::OrchestratorError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::error::OrchestratorError::SystemError {
                message: format!(
                    "illegal subtask transition {:?} -> {:?} for {}",
                    self.status, next, self.id
                ),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Rough token estimate used by the planner's batch packing, per §4.1:
    /// `ceil((|title|+|desc|+|metadataJSON|)/4) + 50`.
    pub fn token_estimate(&self) -> u64 {
        let metadata_len = serde_json::to_string(&self.metadata)
            .map(|s| s.len())
            .unwrap_or(0);
        let chars = self.title.len() + self.description.len() + metadata_len;
        (chars as u64).div_ceil(4) + 50
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_the_allowed_lattice() {
        let mut task = Subtask::new(
            "wf",
            "t",
            "d",
            SubtaskType::Research,
            Priority::Medium,
        );
        assert!(task.transition(SubtaskStatus::Assigned).is_ok());
        assert!(task.transition(SubtaskStatus::InProgress).is_ok());
        assert!(task.transition(SubtaskStatus::Completed).is_ok());
        // Terminal: no further transitions.
        assert!(task.transition(SubtaskStatus::InProgress).is_err());
    }

    #[test]
    fn priority_ordering_places_critical_highest() {
        let mut ps = [Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        ps.sort();
        assert_eq!(
            ps,
            [Priority::Low, Priority::Medium, Priority::High, Priority::Critical]
        );
    }

    #[test]
    fn token_estimate_matches_the_documented_formula() {
        let task = Subtask::new("wf", "t", "d", SubtaskType::Research, Priority::Low);
        let metadata_len = serde_json::to_string(&task.metadata).unwrap().len();
        let expected = ((1 + 1 + metadata_len) as u64).div_ceil(4) + 50;
        assert_eq!(task.token_estimate(), expected);
    }
}
