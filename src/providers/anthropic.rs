use serde_json::json;

use super::AgentCodec;
use crate::error::OrchestratorError;
use crate::model::{Agent, Subtask};

/// Anthropic-style codec: `POST {base}/messages`, content at
/// `content[0].text` (§6).
pub struct AnthropicCodec;

impl AgentCodec for AnthropicCodec {
    fn encode_request(&self, subtask: &Subtask, agent: &Agent, prompt: &str) -> serde_json::Value {
        let model = subtask
            .metadata
            .model_override
            .clone()
            .unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string());
        let _ = agent;
        json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": 4096,
        })
    }

    fn decode_response(&self, body: &serde_json::Value) -> Result<String, OrchestratorError> {
        body.get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::ApiError {
                message: "anthropic response missing content[0].text".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_block() {
        let body = json!({"content": [{"type": "text", "text": "hi"}]});
        assert_eq!(AnthropicCodec.decode_response(&body).unwrap(), "hi");
    }
}
