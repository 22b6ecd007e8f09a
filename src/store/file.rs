//! File-backed durable `ResultStore`: each `SubtaskResult` is appended as a
//! JSON line under a per-workflow directory, built on `serde_json` +
//! `tokio::fs`.
//!
//! Query logic is delegated to an in-memory index kept in sync on every
//! write, since linearizable indexed queries over a flat-file log would
//! otherwise mean re-reading and re-parsing the log on every call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use super::{BatchMetadata, ExecutionLevel, InMemoryResultStore, ReintegrationData, ResultStore};
use crate::model::{ExecutionState, SubtaskResult};

pub struct FileResultStore {
    root: PathBuf,
    index: InMemoryResultStore,
}

impl FileResultStore {
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            index: InMemoryResultStore::new(),
        })
    }

    fn results_log_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join(format!("{workflow_id}.results.jsonl"))
    }

    fn execution_state_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join(format!("{workflow_id}.execution_state.json"))
    }

    async fn append_line(&self, path: &std::path::Path, line: &str) -> anyhow::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn save_subtask_result(&self, result: SubtaskResult) -> anyhow::Result<()> {
        let workflow_id = result
            .batch_id
            .split("::")
            .next()
            .unwrap_or(&result.batch_id)
            .to_string();
        let line = serde_json::to_string(&result)?;
        self.append_line(&self.results_log_path(&workflow_id), &line).await?;
        self.index.save_subtask_result(result).await
    }

    async fn next_execution_order(&self, workflow_id: &str) -> u64 {
        self.index.next_execution_order(workflow_id).await
    }

    async fn get_by_subtask(&self, subtask_id: &str) -> anyhow::Result<Vec<SubtaskResult>> {
        self.index.get_by_subtask(subtask_id).await
    }

    async fn get_by_batch(&self, batch_id: &str) -> anyhow::Result<Vec<SubtaskResult>> {
        self.index.get_by_batch(batch_id).await
    }

    async fn get_by_workflow(&self, workflow_id: &str) -> anyhow::Result<Vec<SubtaskResult>> {
        self.index.get_by_workflow(workflow_id).await
    }

    async fn get_by_status(&self, workflow_id: &str, succeeded: bool) -> anyhow::Result<Vec<SubtaskResult>> {
        self.index.get_by_status(workflow_id, succeeded).await
    }

    async fn get_by_agent(&self, agent_id: &str) -> anyhow::Result<Vec<SubtaskResult>> {
        self.index.get_by_agent(agent_id).await
    }

    async fn get_by_date_range(
        &self,
        workflow_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SubtaskResult>> {
        self.index.get_by_date_range(workflow_id, from, to).await
    }

    async fn save_batch_metadata(&self, metadata: BatchMetadata) -> anyhow::Result<()> {
        let path = self.root.join(format!("{}.batches.jsonl", metadata.workflow_id));
        let line = serde_json::to_string(&metadata)?;
        self.append_line(&path, &line).await?;
        self.index.save_batch_metadata(metadata).await
    }

    async fn get_batch_metadata(&self, workflow_id: &str) -> anyhow::Result<Vec<BatchMetadata>> {
        self.index.get_batch_metadata(workflow_id).await
    }

    async fn save_execution_state(&self, state: ExecutionState) -> anyhow::Result<()> {
        let path = self.execution_state_path(&state.workflow_id);
        let json = serde_json::to_string_pretty(&state)?;
        tokio::fs::write(path, json).await?;
        self.index.save_execution_state(state).await
    }

    async fn load_execution_state(&self, workflow_id: &str) -> anyhow::Result<Option<ExecutionState>> {
        let path = self.execution_state_path(workflow_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return self.index.load_execution_state(workflow_id).await;
        }
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    async fn get_reintegration_data(
        &self,
        workflow_id: &str,
        execution_levels: Vec<ExecutionLevel>,
    ) -> anyhow::Result<ReintegrationData> {
        self.index.get_reintegration_data(workflow_id, execution_levels).await
    }

    async fn validate_integrity(&self, workflow_id: &str) -> anyhow::Result<bool> {
        self.index.validate_integrity(workflow_id).await
    }

    async fn delete_workflow(&self, workflow_id: &str) -> anyhow::Result<()> {
        let _ = tokio::fs::remove_file(self.results_log_path(workflow_id)).await;
        let _ = tokio::fs::remove_file(self.root.join(format!("{workflow_id}.batches.jsonl"))).await;
        let _ = tokio::fs::remove_file(self.execution_state_path(workflow_id)).await;
        self.index.delete_workflow(workflow_id).await
    }
}
