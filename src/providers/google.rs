use serde_json::json;

use super::AgentCodec;
use crate::error::OrchestratorError;
use crate::model::{Agent, Subtask};

/// Google-style codec: `POST {base}/models/{model}:generateContent`,
/// content at `candidates[0].content.parts[0].text` (§6).
pub struct GoogleCodec;

impl AgentCodec for GoogleCodec {
    fn encode_request(&self, subtask: &Subtask, agent: &Agent, prompt: &str) -> serde_json::Value {
        let _ = (subtask, agent);
        json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": 0.7, "maxOutputTokens": 4096},
        })
    }

    fn decode_response(&self, body: &serde_json::Value) -> Result<String, OrchestratorError> {
        body.get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::ApiError {
                message: "google response missing candidates[0].content.parts[0].text".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nested_parts_text() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "ok"}]}}]});
        assert_eq!(GoogleCodec.decode_response(&body).unwrap(), "ok");
    }
}
