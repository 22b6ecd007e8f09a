//! Secure-key store contract and endpoint configuration (C12, §4.10, §6).
//!
//! Out of scope per §1: this module specifies only the `Get(agentId) ->
//! key` / `EndpointConfig(agent)` contract and an in-memory reference
//! implementation standing in for a real secret store.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A secret value that never derives `Debug`/`Display`, so it cannot
/// accidentally end up in a log line or error message.
#[derive(Clone)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

/// Wire format tag, mirrors the four provider shapes of §6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    OpenAi,
    Anthropic,
    Google,
    Custom,
}

/// Everything the HTTP client needs to reach one agent's endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub auth_header: Option<String>,
    pub format: WireFormat,
}

/// `Get(agentId) -> key`, `EndpointConfig(agent) -> {...}` (§6).
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(&self, agent_id: &str) -> anyhow::Result<SecretKey>;
    fn endpoint_config(&self, agent: &crate::model::Agent) -> anyhow::Result<EndpointConfig>;
}

/// In-memory reference implementation seeded at construction. Stands in
/// for an externally-specified secure store (production key management is
/// out of scope, §1).
pub struct InMemoryKeyStore {
    keys: DashMap<String, SecretKey>,
    endpoints: DashMap<String, EndpointConfig>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
            endpoints: DashMap::new(),
        }
    }

    pub fn seed_key(&self, agent_id: impl Into<String>, key: impl Into<String>) {
        self.keys.insert(agent_id.into(), SecretKey::new(key));
    }

    pub fn seed_endpoint(&self, agent_id: impl Into<String>, config: EndpointConfig) {
        self.endpoints.insert(agent_id.into(), config);
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get(&self, agent_id: &str) -> anyhow::Result<SecretKey> {
        self.keys
            .get(agent_id)
            .map(|k| k.clone())
            .ok_or_else(|| anyhow::anyhow!("no key seeded for agent {agent_id}"))
    }

    fn endpoint_config(&self, agent: &crate::model::Agent) -> anyhow::Result<EndpointConfig> {
        if let Some(config) = self.endpoints.get(&agent.id) {
            return Ok(config.clone());
        }
        // Fall back to a provider-tag default so agents can be matched
        // against a live endpoint without per-agent seeding in tests/demos.
        let format = match agent.provider.as_str() {
            "anthropic" => WireFormat::Anthropic,
            "google" => WireFormat::Google,
            "openai" => WireFormat::OpenAi,
            _ => WireFormat::Custom,
        };
        let (path, auth_header) = match format {
            WireFormat::OpenAi => ("/chat/completions".to_string(), Some("Authorization".to_string())),
            WireFormat::Anthropic => ("/messages".to_string(), Some("x-api-key".to_string())),
            WireFormat::Google => (format!("/models/{}:generateContent", "gemini-1.5-pro"), None),
            WireFormat::Custom => ("/generate".to_string(), Some("Authorization".to_string())),
        };
        let mut headers = Vec::new();
        if format == WireFormat::Anthropic {
            headers.push(("anthropic-version".to_string(), "2023-06-01".to_string()));
        }
        Ok(EndpointConfig {
            base_url: format!("https://api.{}.example", agent.provider),
            path,
            headers,
            auth_header,
            format,
        })
    }
}
