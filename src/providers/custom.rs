use serde_json::json;

use super::AgentCodec;
use crate::error::OrchestratorError;
use crate::model::{Agent, Subtask};

/// Custom codec: `{prompt, max_tokens, temperature}`, content read from the
/// first of `content`, `message`, `text`, `output` that is present (§6).
pub struct CustomCodec;

impl AgentCodec for CustomCodec {
    fn encode_request(&self, subtask: &Subtask, agent: &Agent, prompt: &str) -> serde_json::Value {
        let _ = (subtask, agent);
        json!({
            "prompt": prompt,
            "max_tokens": 4096,
            "temperature": 0.7,
        })
    }

    fn decode_response(&self, body: &serde_json::Value) -> Result<String, OrchestratorError> {
        for field in ["content", "message", "text", "output"] {
            if let Some(text) = body.get(field).and_then(|v| v.as_str()) {
                return Ok(text.to_string());
            }
        }
        Err(OrchestratorError::ApiError {
            message: "custom response missing content|message|text|output".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_through_field_priority_order() {
        let body = json!({"output": "fallback text"});
        assert_eq!(CustomCodec.decode_response(&body).unwrap(), "fallback text");
    }

    #[test]
    fn prefers_content_over_other_fields() {
        let body = json!({"content": "c", "text": "t"});
        assert_eq!(CustomCodec.decode_response(&body).unwrap(), "c");
    }
}
