//! In-memory reference `ResultStore` backed by `DashMap`, giving
//! linearizable per-key writes without a single global lock (§4.8).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{BatchMetadata, ExecutionLevel, ExecutionSummary, ReintegrationData, ResultStore};
use crate::model::{ExecutionState, SubtaskResult};

#[derive(Default)]
pub struct InMemoryResultStore {
    // subtask_id -> every attempt, in persistence order.
    by_subtask: DashMap<String, Vec<SubtaskResult>>,
    batches: DashMap<String, BatchMetadata>,
    execution_states: DashMap<String, ExecutionState>,
    // workflow_id -> subtask ids ever batched, used by validate_integrity.
    workflow_subtasks: DashMap<String, std::collections::HashSet<String>>,
    order_counters: DashMap<String, Arc<AtomicU64>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn all_results(&self) -> Vec<SubtaskResult> {
        self.by_subtask.iter().flat_map(|e| e.value().clone()).collect()
    }

    fn results_for_workflow(&self, workflow_id: &str) -> Vec<SubtaskResult> {
        self.workflow_subtasks
            .get(workflow_id)
            .map(|ids| {
                ids.iter()
                    .flat_map(|id| self.by_subtask.get(id).map(|r| r.value().clone()).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_subtask_result(&self, result: SubtaskResult) -> anyhow::Result<()> {
        self.workflow_subtasks
            .entry(workflow_id_for(&result))
            .or_default()
            .insert(result.subtask_id.clone());
        self.by_subtask.entry(result.subtask_id.clone()).or_default().push(result);
        Ok(())
    }

    async fn next_execution_order(&self, workflow_id: &str) -> u64 {
        let counter = self
            .order_counters
            .entry(workflow_id.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn get_by_subtask(&self, subtask_id: &str) -> anyhow::Result<Vec<SubtaskResult>> {
        Ok(self.by_subtask.get(subtask_id).map(|r| r.value().clone()).unwrap_or_default())
    }

    async fn get_by_batch(&self, batch_id: &str) -> anyhow::Result<Vec<SubtaskResult>> {
        Ok(self.all_results().into_iter().filter(|r| r.batch_id == batch_id).collect())
    }

    async fn get_by_workflow(&self, workflow_id: &str) -> anyhow::Result<Vec<SubtaskResult>> {
        Ok(self.results_for_workflow(workflow_id))
    }

    async fn get_by_status(&self, workflow_id: &str, succeeded: bool) -> anyhow::Result<Vec<SubtaskResult>> {
        Ok(self
            .results_for_workflow(workflow_id)
            .into_iter()
            .filter(|r| r.errors.is_empty() == succeeded)
            .collect())
    }

    async fn get_by_agent(&self, agent_id: &str) -> anyhow::Result<Vec<SubtaskResult>> {
        Ok(self.all_results().into_iter().filter(|r| r.agent_id == agent_id).collect())
    }

    async fn get_by_date_range(
        &self,
        workflow_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SubtaskResult>> {
        Ok(self
            .results_for_workflow(workflow_id)
            .into_iter()
            .filter(|r| r.generated_at >= from && r.generated_at <= to)
            .collect())
    }

    async fn save_batch_metadata(&self, metadata: BatchMetadata) -> anyhow::Result<()> {
        self.workflow_subtasks
            .entry(metadata.workflow_id.clone())
            .or_default()
            .extend(metadata.subtask_ids.iter().cloned());
        self.batches.insert(metadata.batch_id.clone(), metadata);
        Ok(())
    }

    async fn get_batch_metadata(&self, workflow_id: &str) -> anyhow::Result<Vec<BatchMetadata>> {
        let mut batches: Vec<BatchMetadata> = self
            .batches
            .iter()
            .filter(|e| e.value().workflow_id == workflow_id)
            .map(|e| e.value().clone())
            .collect();
        batches.sort_by_key(|b| b.batch_index);
        Ok(batches)
    }

    async fn save_execution_state(&self, state: ExecutionState) -> anyhow::Result<()> {
        self.execution_states.insert(state.workflow_id.clone(), state);
        Ok(())
    }

    async fn load_execution_state(&self, workflow_id: &str) -> anyhow::Result<Option<ExecutionState>> {
        Ok(self.execution_states.get(workflow_id).map(|s| s.clone()))
    }

    async fn get_reintegration_data(
        &self,
        workflow_id: &str,
        execution_levels: Vec<ExecutionLevel>,
    ) -> anyhow::Result<ReintegrationData> {
        let mut results = self.results_for_workflow(workflow_id);
        results.sort_by_key(|r| r.execution_order);

        let batches = self.get_batch_metadata(workflow_id).await?;

        let succeeded = results.iter().filter(|r| r.errors.is_empty()).count();
        let failed = results.len() - succeeded;
        let total_duration_ms: i64 = batches
            .iter()
            .filter_map(|b| b.ended_at.map(|end| (end - b.started_at).num_milliseconds()))
            .sum();
        let avg_duration_ms = if results.is_empty() {
            0.0
        } else {
            total_duration_ms as f64 / results.len() as f64
        };

        Ok(ReintegrationData {
            workflow_id: workflow_id.to_string(),
            results: results.clone(),
            execution_levels,
            batches,
            summary: ExecutionSummary {
                total: results.len(),
                succeeded,
                failed,
                total_duration_ms,
                avg_duration_ms,
            },
        })
    }

    async fn validate_integrity(&self, workflow_id: &str) -> anyhow::Result<bool> {
        let results = self.results_for_workflow(workflow_id);
        if results.iter().any(|r| !r.verify_checksum()) {
            return Ok(false);
        }
        let known_subtasks = self
            .workflow_subtasks
            .get(workflow_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let has_result: std::collections::HashSet<&str> = results.iter().map(|r| r.subtask_id.as_str()).collect();
        Ok(known_subtasks.iter().all(|id| has_result.contains(id.as_str())))
    }

    async fn delete_workflow(&self, workflow_id: &str) -> anyhow::Result<()> {
        if let Some((_, ids)) = self.workflow_subtasks.remove(workflow_id) {
            for id in ids {
                self.by_subtask.remove(&id);
            }
        }
        self.batches.retain(|_, v| v.workflow_id != workflow_id);
        self.execution_states.remove(workflow_id);
        self.order_counters.remove(workflow_id);
        Ok(())
    }
}

/// Best-effort workflow attribution for a bare `SubtaskResult`: the store's
/// subtask-keyed index has no workflow id of its own, so batch ids (which
/// are always created per-workflow by the dispatcher) stand in.
fn workflow_id_for(result: &SubtaskResult) -> String {
    result
        .batch_id
        .split("::")
        .next()
        .unwrap_or(&result.batch_id)
        .to_string()
}
