use serde_json::json;

use super::AgentCodec;
use crate::error::OrchestratorError;
use crate::model::{Agent, Subtask};

/// OpenAI-style codec: `POST {base}/chat/completions`, content at
/// `choices[0].message.content` (§6).
pub struct OpenAiCodec;

impl AgentCodec for OpenAiCodec {
    fn encode_request(&self, subtask: &Subtask, agent: &Agent, prompt: &str) -> serde_json::Value {
        let model = subtask
            .metadata
            .model_override
            .clone()
            .unwrap_or_else(|| "gpt-4o".to_string());
        let _ = agent;
        json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": 4096,
            "temperature": 0.7,
        })
    }

    fn decode_response(&self, body: &serde_json::Value) -> Result<String, OrchestratorError> {
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::ApiError {
                message: "openai response missing choices[0].message.content".to_string(),
            })
    }
}
