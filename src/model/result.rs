use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Token usage reported by an agent call, when the provider surfaces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// The result of one subtask execution attempt, persisted by the result
/// store and eventually consumed by reintegration.
///
/// `checksum` is the deterministic hash of the content-bearing fields
/// (§3 invariant, §8 property 5); see [`SubtaskResult::compute_checksum`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub subtask_id: String,
    pub agent_id: String,
    pub content: String,
    pub generated_at: DateTime<Utc>,
    pub token_usage: TokenUsage,
    pub confidence: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub execution_order: u64,
    pub batch_id: String,
    pub checksum: String,
}

impl SubtaskResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subtask_id: impl Into<String>,
        agent_id: impl Into<String>,
        content: impl Into<String>,
        token_usage: TokenUsage,
        confidence: f64,
        errors: Vec<String>,
        warnings: Vec<String>,
        execution_order: u64,
        batch_id: impl Into<String>,
    ) -> Self {
        let subtask_id = subtask_id.into();
        let agent_id = agent_id.into();
        let content = content.into();
        let batch_id = batch_id.into();
        let generated_at = Utc::now();
        let checksum = Self::compute_checksum(&subtask_id, &agent_id, &content, confidence);
        Self {
            subtask_id,
            agent_id,
            content,
            generated_at,
            token_usage,
            confidence,
            errors,
            warnings,
            execution_order,
            batch_id,
            checksum,
        }
    }

    /// Deterministic hash over the content-bearing fields. Excludes
    /// `generated_at`/`execution_order` so that the same agent output
    /// always checksums identically regardless of persistence timing.
    pub fn compute_checksum(subtask_id: &str, agent_id: &str, content: &str, confidence: f64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(subtask_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(agent_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(content.as_bytes());
        hasher.update(b"\0");
        hasher.update(confidence.to_bits().to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum
            == Self::compute_checksum(&self.subtask_id, &self.agent_id, &self.content, self.confidence)
    }
}
