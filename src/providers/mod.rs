//! Pluggable per-provider agent HTTP codec and client (C11, §6).
//!
//! One codec type per backend behind a shared trait, each encoding a
//! request and decoding a response for one HTTP-native provider shape.

mod anthropic;
mod google;
mod openai;
mod custom;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::OrchestratorError;
use crate::keystore::EndpointConfig;
use crate::model::{Agent, Subtask};

pub use anthropic::AnthropicCodec;
pub use custom::CustomCodec;
pub use google::GoogleCodec;
pub use openai::OpenAiCodec;

/// Per-provider request/response translation, selected by the key store's
/// provider tag (§6).
pub trait AgentCodec: Send + Sync {
    fn encode_request(&self, subtask: &Subtask, agent: &Agent, prompt: &str) -> serde_json::Value;
    fn decode_response(&self, body: &serde_json::Value) -> Result<String, OrchestratorError>;
}

pub fn codec_for(provider: &str) -> Box<dyn AgentCodec> {
    match provider {
        "anthropic" => Box::new(AnthropicCodec),
        "google" => Box::new(GoogleCodec),
        "openai" => Box::new(OpenAiCodec),
        _ => Box::new(CustomCodec),
    }
}

/// Outbound HTTP call result, prior to validator-facing interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Wraps a `reqwest::Client`, the codec registry, and the key store behind
/// one call surface the dispatcher drives (§4.10).
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn call(
        &self,
        subtask: &Subtask,
        agent: &Agent,
        prompt: &str,
        timeout: Duration,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> Result<AgentResponse, OrchestratorError>;
}

/// Production implementation issuing real HTTP requests via `reqwest`.
pub struct HttpAgentClient {
    http: reqwest::Client,
    key_store: std::sync::Arc<dyn crate::keystore::KeyStore>,
}

impl HttpAgentClient {
    pub fn new(key_store: std::sync::Arc<dyn crate::keystore::KeyStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            key_store,
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn call(
        &self,
        subtask: &Subtask,
        agent: &Agent,
        prompt: &str,
        timeout: Duration,
        cancellation: tokio_util::sync::CancellationToken,
    ) -> Result<AgentResponse, OrchestratorError> {
        let EndpointConfig {
            base_url,
            path,
            headers,
            auth_header,
            format: _,
        } = self.key_store.endpoint_config(agent).map_err(|e| OrchestratorError::SystemError {
            message: format!("endpoint config lookup failed: {e}"),
        })?;
        let key = self
            .key_store
            .get(&agent.id)
            .await
            .map_err(|e| OrchestratorError::SystemError {
                message: format!("key lookup failed for agent {}: {e}", agent.id),
            })?;

        let codec = codec_for(&agent.provider);
        let body = codec.encode_request(subtask, agent, prompt);
        let url = format!("{base_url}{path}");

        let mut request = self.http.post(&url).json(&body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(header_name) = auth_header {
            request = request.header(header_name, key.expose());
        }

        let call = async {
            let response = request.send().await.map_err(|e| OrchestratorError::ApiError {
                message: format!("request to {url} failed: {e}"),
            })?;
            if !response.status().is_success() {
                return Err(OrchestratorError::ApiError {
                    message: format!("agent {} returned HTTP {}", agent.id, response.status()),
                });
            }
            let json: serde_json::Value = response.json().await.map_err(|e| OrchestratorError::ApiError {
                message: format!("malformed response body: {e}"),
            })?;
            let content = codec.decode_response(&json)?;
            Ok(AgentResponse {
                content,
                prompt_tokens: json
                    .get("usage")
                    .and_then(|u| u.get("prompt_tokens"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                completion_tokens: json
                    .get("usage")
                    .and_then(|u| u.get("completion_tokens"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
            })
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(inner) => inner,
                Err(_) => Err(OrchestratorError::Timeout {
                    message: format!("agent {} did not respond within {:?}", agent.id, timeout),
                }),
            },
            _ = cancellation.cancelled() => Err(OrchestratorError::Cancelled {
                message: format!("subtask {} cancelled mid-flight", subtask.id),
            }),
        }
    }
}
