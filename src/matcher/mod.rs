//! Agent scoring and assignment (C4, §4.4).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{Agent, CapabilityCategory, Priority, Subtask};

/// Weights applied to the four subscores; must each be in `[0,1]` and are
/// not required to sum to 1 (the caller is responsible for normalization
/// if that invariant matters to them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityWeights {
    pub capability: f64,
    pub proficiency: f64,
    pub cost: f64,
    pub availability: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            capability: 0.35,
            proficiency: 0.25,
            cost: 0.2,
            availability: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub priority_weights: PriorityWeights,
    /// Normalization constant for the cost subscore, configurable rather
    /// than a fixed constant.
    pub cost_ceiling: f64,
    /// Floor score injected for fallback-rule candidates.
    pub fallback_floor_score: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            priority_weights: PriorityWeights::default(),
            cost_ceiling: 50.0,
            fallback_floor_score: 30.0,
        }
    }
}

/// One ranked candidate from [`Matcher::match_agents`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMatch {
    pub agent_id: String,
    pub score: f64,
    pub notes: Vec<String>,
    pub est_cost: Option<f64>,
    pub est_duration_minutes: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    pub config: MatcherConfig,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// `Match(subtask, agents, config)`, §4.4.
    pub fn match_agents(&self, subtask: &Subtask, agents: &[&Agent]) -> Vec<AgentMatch> {
        let category = CapabilityCategory::from(subtask.subtask_type);
        let mut ranked: Vec<AgentMatch> = agents
            .iter()
            .map(|agent| self.score_agent(subtask, agent, category))
            .collect();

        if ranked.is_empty() || ranked.iter().all(|m| m.score < 40.0) {
            // no_matches / low_quality_matches fallback rule: inject any
            // available agent not already ranked, at the floor score.
            for agent in agents {
                if !ranked.iter().any(|m| m.agent_id == agent.id) && agent.available {
                    ranked.push(AgentMatch {
                        agent_id: agent.id.clone(),
                        score: self.config.fallback_floor_score,
                        notes: vec!["injected by fallback rule".to_string()],
                        est_cost: None,
                        est_duration_minutes: subtask.subtask_type.default_duration_minutes(),
                    });
                }
            }
        }

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    fn score_agent(&self, subtask: &Subtask, agent: &Agent, category: CapabilityCategory) -> AgentMatch {
        let relevant = agent.relevant_capabilities(category);
        let weights = &self.config.priority_weights;

        let mut capability_score = (25.0 * relevant.len() as f64).min(100.0);
        if agent.has_category(category) {
            capability_score = (capability_score + 20.0).min(100.0);
        }

        let proficiency_score = if relevant.is_empty() {
            0.0
        } else {
            relevant.iter().map(|c| c.proficiency.score()).sum::<f64>() / relevant.len() as f64
        };

        let base_duration = subtask
            .estimated_duration_minutes
            .unwrap_or_else(|| subtask.subtask_type.default_duration_minutes());
        let est_duration = base_duration * agent.metrics.performance_multiplier();

        let (cost_score, est_cost) = match agent.cost_per_minute {
            None => (100.0, None),
            Some(rate) => {
                let cost = (est_duration / 60.0) * rate;
                let score = (100.0 - (cost / self.config.cost_ceiling) * 100.0).max(0.0);
                (score, Some(cost))
            }
        };

        let availability_score = if agent.available { 100.0 } else { 0.0 };

        let score = weights.capability * capability_score
            + weights.proficiency * proficiency_score
            + weights.cost * cost_score
            + weights.availability * availability_score;

        let mut notes = Vec::new();
        if relevant.is_empty() {
            notes.push("no directly relevant capability".to_string());
        }
        if !agent.available {
            notes.push("agent currently unavailable".to_string());
        }

        AgentMatch {
            agent_id: agent.id.clone(),
            score,
            notes,
            est_cost,
            est_duration_minutes: est_duration,
        }
    }

    /// `Assign(subtasks, …)`: iterate subtasks in priority order, preferring
    /// unassigned agents for load spreading; fall back to reassigning
    /// already-used agents once the free pool is exhausted (§4.4).
    pub fn assign(&self, subtasks: &[Subtask], agents: &[&Agent]) -> HashMap<String, String> {
        let mut ordered: Vec<&Subtask> = subtasks.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.created_at.cmp(&b.created_at)));

        let mut assignments = HashMap::new();
        let mut used_agents: std::collections::HashSet<String> = std::collections::HashSet::new();

        for subtask in ordered {
            let ranked = self.match_agents(subtask, agents);
            let preferred = ranked.iter().find(|m| !used_agents.contains(&m.agent_id));
            let chosen = preferred.or_else(|| ranked.first());
            if let Some(m) = chosen {
                assignments.insert(subtask.id.clone(), m.agent_id.clone());
                used_agents.insert(m.agent_id.clone());
            }
        }

        assignments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Capability, CapabilityCategory, ProficiencyLevel, SubtaskType};

    fn expert_agent(id: &str, category: CapabilityCategory) -> Agent {
        Agent::new(id, id, "openai").with_capability(category, ProficiencyLevel::Expert)
    }

    #[test]
    fn matching_agent_outranks_unrelated_agent() {
        let matcher = Matcher::default();
        let subtask = Subtask::new("wf", "t", "d", SubtaskType::Research, Priority::Medium);
        let research_agent = expert_agent("r1", CapabilityCategory::Research);
        let creation_agent = expert_agent("c1", CapabilityCategory::Creation);
        let ranked = matcher.match_agents(&subtask, &[&research_agent, &creation_agent]);
        assert_eq!(ranked[0].agent_id, "r1");
    }

    #[test]
    fn unavailable_agent_scores_lower_than_available_one() {
        let matcher = Matcher::default();
        let subtask = Subtask::new("wf", "t", "d", SubtaskType::Research, Priority::Medium);
        let mut unavailable = expert_agent("u1", CapabilityCategory::Research);
        unavailable.available = false;
        let available = expert_agent("a1", CapabilityCategory::Research);
        let ranked = matcher.match_agents(&subtask, &[&unavailable, &available]);
        assert_eq!(ranked[0].agent_id, "a1");
    }

    #[test]
    fn assign_spreads_load_across_agents_before_reusing() {
        let matcher = Matcher::default();
        let t1 = Subtask::new("wf", "t1", "d", SubtaskType::Research, Priority::High);
        let t2 = Subtask::new("wf", "t2", "d", SubtaskType::Research, Priority::High);
        let a1 = expert_agent("a1", CapabilityCategory::Research);
        let a2 = expert_agent("a2", CapabilityCategory::Research);
        let assignments = matcher.assign(&[t1.clone(), t2.clone()], &[&a1, &a2]);
        let assigned_agents: std::collections::HashSet<&String> = assignments.values().collect();
        assert_eq!(assigned_agents.len(), 2);
    }
}
