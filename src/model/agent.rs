use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::subtask::SubtaskType;

/// Skill proficiency level, scored by the matcher per §4.4.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProficiencyLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl ProficiencyLevel {
    pub fn score(self) -> f64 {
        match self {
            ProficiencyLevel::Beginner => 40.0,
            ProficiencyLevel::Intermediate => 60.0,
            ProficiencyLevel::Advanced => 80.0,
            ProficiencyLevel::Expert => 100.0,
        }
    }
}

/// A capability category. Maps 1:1 onto [`SubtaskType`] for the matcher's
/// category-match bonus, but kept as its own type since an agent's
/// capability set is not restricted to the four subtask categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapabilityCategory {
    Research,
    Analysis,
    Creation,
    Validation,
}

impl From<SubtaskType> for CapabilityCategory {
    fn from(t: SubtaskType) -> Self {
        match t {
            SubtaskType::Research => CapabilityCategory::Research,
            SubtaskType::Analysis => CapabilityCategory::Analysis,
            SubtaskType::Creation => CapabilityCategory::Creation,
            SubtaskType::Validation => CapabilityCategory::Validation,
        }
    }
}

/// A single category/proficiency pairing an agent advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub category: CapabilityCategory,
    pub proficiency: ProficiencyLevel,
}

/// Rolling performance metrics the matcher and fallback manager read, and
/// the dispatcher/fallback manager update after every completed subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_completion_time_secs: f64,
    pub success_rate: f64,
    pub quality_score: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            avg_completion_time_secs: 0.0,
            success_rate: 1.0,
            quality_score: 0.8,
        }
    }
}

impl PerformanceMetrics {
    /// `perfMultiplier = max(0.5, 1.5 - (quality*0.3 + success*0.2))`, §4.4.
    pub fn performance_multiplier(&self) -> f64 {
        (1.5 - (self.quality_score * 0.3 + self.success_rate * 0.2)).max(0.5)
    }
}

/// An AI agent endpoint the matcher and dispatcher can target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub capabilities: Vec<Capability>,
    pub available: bool,
    pub cost_per_minute: Option<f64>,
    pub max_concurrency: Option<usize>,
    pub metrics: PerformanceMetrics,
    /// Provider tag used to select the HTTP codec (§6) and look up the key
    /// in the key store (§4.10).
    pub provider: String,
}

impl Agent {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            capabilities: Vec::new(),
            available: true,
            cost_per_minute: None,
            max_concurrency: None,
            metrics: PerformanceMetrics::default(),
            provider: provider.into(),
        }
    }

    pub fn with_capability(mut self, category: CapabilityCategory, proficiency: ProficiencyLevel) -> Self {
        self.capabilities.push(Capability { category, proficiency });
        self
    }

    pub fn relevant_capabilities(&self, category: CapabilityCategory) -> Vec<&Capability> {
        self.capabilities
            .iter()
            .filter(|c| c.category == category)
            .collect()
    }

    pub fn has_category(&self, category: CapabilityCategory) -> bool {
        self.capabilities.iter().any(|c| c.category == category)
    }
}

/// Simple registry of known agents, keyed by id. A thin convenience type
/// over what the matcher and dispatcher otherwise take as a plain slice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegistry {
    pub agents: HashMap<String, Agent>,
}

impl AgentRegistry {
    pub fn insert(&mut self, agent: Agent) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn available(&self) -> Vec<&Agent> {
        self.agents.values().filter(|a| a.available).collect()
    }
}
