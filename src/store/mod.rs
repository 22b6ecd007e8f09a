//! Append-mostly result store: the stable persistence boundary behind
//! which in-memory and durable backends are interchangeable (C2, §4.8).

mod file;
mod memory;

pub use file::FileResultStore;
pub use memory::InMemoryResultStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ExecutionState, SubtaskResult};

/// Metadata recorded once per dispatched batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: String,
    pub workflow_id: String,
    pub batch_index: usize,
    pub subtask_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One subtask's position in the dependency DAG, computed for
/// reintegration's by-dependency-level sectioning (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLevel {
    pub subtask_id: String,
    pub level: usize,
}

/// Aggregate counts/durations over a workflow's results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_duration_ms: i64,
    pub avg_duration_ms: f64,
}

/// Everything reintegration needs to assemble a final document (§4.8, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReintegrationData {
    pub workflow_id: String,
    pub results: Vec<SubtaskResult>,
    pub execution_levels: Vec<ExecutionLevel>,
    pub batches: Vec<BatchMetadata>,
    pub summary: ExecutionSummary,
}

/// The 14-method persistence boundary (§4.8, §6) that in-memory and
/// durable backends both satisfy.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_subtask_result(&self, result: SubtaskResult) -> anyhow::Result<()>;
    async fn next_execution_order(&self, workflow_id: &str) -> u64;

    async fn get_by_subtask(&self, subtask_id: &str) -> anyhow::Result<Vec<SubtaskResult>>;
    async fn get_by_batch(&self, batch_id: &str) -> anyhow::Result<Vec<SubtaskResult>>;
    async fn get_by_workflow(&self, workflow_id: &str) -> anyhow::Result<Vec<SubtaskResult>>;
    async fn get_by_status(&self, workflow_id: &str, succeeded: bool) -> anyhow::Result<Vec<SubtaskResult>>;
    async fn get_by_agent(&self, agent_id: &str) -> anyhow::Result<Vec<SubtaskResult>>;
    async fn get_by_date_range(
        &self,
        workflow_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SubtaskResult>>;

    async fn save_batch_metadata(&self, metadata: BatchMetadata) -> anyhow::Result<()>;
    async fn get_batch_metadata(&self, workflow_id: &str) -> anyhow::Result<Vec<BatchMetadata>>;

    async fn save_execution_state(&self, state: ExecutionState) -> anyhow::Result<()>;
    async fn load_execution_state(&self, workflow_id: &str) -> anyhow::Result<Option<ExecutionState>>;

    async fn get_reintegration_data(
        &self,
        workflow_id: &str,
        execution_levels: Vec<ExecutionLevel>,
    ) -> anyhow::Result<ReintegrationData>;

    /// Recomputes checksums and verifies that every dependency referenced
    /// in every stored result is itself present (§4.8).
    async fn validate_integrity(&self, workflow_id: &str) -> anyhow::Result<bool>;

    async fn delete_workflow(&self, workflow_id: &str) -> anyhow::Result<()>;
}
