//! Health tracking, circuit breakers, and load-balanced agent reselection (C7, §4.5).

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::OrchestratorError;
use crate::model::{Agent, AgentHealth, HealthStatus, Subtask};

const DEGRADED_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStrategy {
    RoundRobin,
    LeastLoaded,
    CapabilityBased,
    PerformanceBased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub max_fallback_depth: usize,
    pub fallback_delay_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_ms: i64,
    pub strategy: FallbackStrategy,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_fallback_depth: 3,
            fallback_delay_ms: 5000,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 300_000,
            strategy: FallbackStrategy::CapabilityBased,
        }
    }
}

/// Owns the per-agent health table exclusively (§3 lifecycle ownership).
/// Cross-component reads go through [`FallbackManager::health_snapshot`].
pub struct FallbackManager {
    pub config: FallbackConfig,
    health: DashMap<String, AgentHealth>,
    round_robin_counter: AtomicUsize,
}

impl FallbackManager {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            health: DashMap::new(),
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    pub fn health_snapshot(&self, agent_id: &str) -> Option<AgentHealth> {
        self.health.get(agent_id).map(|h| h.clone())
    }

    fn entry(&self, agent_id: &str) -> dashmap::mapref::one::RefMut<'_, String, AgentHealth> {
        self.health
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentHealth::new(agent_id))
    }

    /// §4.5 transitions, success path: `degraded -> healthy` on any success
    /// with zero prior failures in window; a circuit-open agent that was
    /// lazily reopened to degraded also heals here.
    pub fn record_success(&self, agent_id: &str, response_time_ms: f64) {
        let mut health = self.entry(agent_id);
        health.record_outcome(true);
        health.record_response_time(response_time_ms);
        health.consecutive_failures = 0;
        health.in_flight = health.in_flight.saturating_sub(1);
        if matches!(health.status, HealthStatus::Degraded | HealthStatus::Failed) {
            health.status = HealthStatus::Healthy;
        }
    }

    /// §4.5 transitions, failure path.
    pub fn record_failure(&self, agent_id: &str) {
        let mut health = self.entry(agent_id);
        health.record_outcome(false);
        health.consecutive_failures += 1;
        health.in_flight = health.in_flight.saturating_sub(1);

        if health.consecutive_failures >= self.config.circuit_breaker_threshold {
            health.status = HealthStatus::CircuitOpen;
            health.circuit_breaker_open_until =
                Some(Utc::now() + chrono::Duration::milliseconds(self.config.circuit_breaker_timeout_ms));
        } else if health.consecutive_failures >= DEGRADED_THRESHOLD {
            health.status = HealthStatus::Degraded;
        }
    }

    pub fn mark_dispatch_started(&self, agent_id: &str) {
        self.entry(agent_id).in_flight += 1;
    }

    /// Lazily reopens a circuit-open agent to `degraded` once its
    /// `openUntil` has passed, resetting the consecutive-failure counter
    /// (§4.5 `circuit-open -> degraded`).
    fn reopen_if_expired(&self, agent_id: &str) {
        let now = Utc::now();
        let mut health = self.entry(agent_id);
        if health.status == HealthStatus::CircuitOpen && !health.is_circuit_open(now) {
            health.status = HealthStatus::Degraded;
            health.consecutive_failures = 0;
            health.circuit_breaker_open_until = None;
        }
    }

    fn is_selectable(&self, agent: &Agent, exclude: &HashSet<String>) -> bool {
        if exclude.contains(&agent.id) || !agent.available {
            return false;
        }
        self.reopen_if_expired(&agent.id);
        match self.health.get(&agent.id) {
            Some(health) => !health.is_circuit_open(Utc::now()) && health.status != HealthStatus::Failed,
            None => true,
        }
    }

    /// `SelectAgent(subtask, available, exclude)`, §4.5.
    pub fn select_agent<'a>(
        &self,
        subtask: &Subtask,
        available: &[&'a Agent],
        exclude: &HashSet<String>,
    ) -> Option<&'a Agent> {
        let candidates: Vec<&&Agent> = available.iter().filter(|a| self.is_selectable(a, exclude)).collect();
        if candidates.is_empty() {
            return None;
        }

        match self.config.strategy {
            FallbackStrategy::RoundRobin => {
                let idx = self.round_robin_counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(*candidates[idx])
            }
            FallbackStrategy::LeastLoaded => candidates
                .into_iter()
                .min_by_key(|a| self.health_snapshot(&a.id).map(|h| h.in_flight).unwrap_or(0))
                .copied(),
            FallbackStrategy::CapabilityBased => {
                let category = crate::model::CapabilityCategory::from(subtask.subtask_type);
                let mut capable: Vec<&&Agent> =
                    candidates.iter().filter(|a| a.has_category(category)).copied().collect();
                if capable.is_empty() {
                    capable = candidates;
                }
                capable
                    .into_iter()
                    .max_by(|a, b| self.capability_score(a).partial_cmp(&self.capability_score(b)).unwrap())
                    .copied()
            }
            FallbackStrategy::PerformanceBased => candidates
                .into_iter()
                .max_by(|a, b| self.performance_score(a).partial_cmp(&self.performance_score(b)).unwrap())
                .copied(),
        }
    }

    fn capability_score(&self, agent: &Agent) -> f64 {
        let health = self.health_snapshot(&agent.id);
        let success_rate = health.as_ref().map(|h| h.success_rate()).unwrap_or(1.0);
        let healthy_factor = health
            .as_ref()
            .map(|h| if h.status == HealthStatus::Healthy { 1.0 } else { 0.5 })
            .unwrap_or(1.0);
        success_rate * healthy_factor
    }

    fn performance_score(&self, agent: &Agent) -> f64 {
        let health = self.health_snapshot(&agent.id);
        let success = health.as_ref().map(|h| h.success_rate()).unwrap_or(1.0);
        let load = health.as_ref().map(|h| h.in_flight as f64).unwrap_or(0.0);
        let max_resp = health
            .as_ref()
            .map(|h| h.avg_response_time_ms.max(1.0))
            .unwrap_or(1.0);
        let healthy_factor = health
            .as_ref()
            .map(|h| if h.status == HealthStatus::Healthy { 1.0 } else { 0.5 })
            .unwrap_or(1.0);
        0.4 * success + 0.3 * (1.0 - (load / 10.0).min(1.0)) + 0.2 * (1.0 / max_resp) + 0.1 * healthy_factor
    }

    /// `ExecuteFallback(subtask, failed, err, available)`, §4.5: records
    /// the failure, waits `fallbackDelay`, and returns the first viable
    /// substitute from a chain of up to `maxFallbackDepth` candidates.
    pub async fn execute_fallback<'a>(
        &self,
        subtask: &Subtask,
        failed_agent_id: &str,
        available: &[&'a Agent],
    ) -> Result<Option<&'a Agent>, OrchestratorError> {
        if !self.config.enabled {
            return Ok(None);
        }
        self.record_failure(failed_agent_id);

        tokio::time::sleep(Duration::from_millis(self.config.fallback_delay_ms)).await;

        let mut exclude: HashSet<String> = HashSet::new();
        exclude.insert(failed_agent_id.to_string());

        for _ in 0..self.config.max_fallback_depth {
            match self.select_agent(subtask, available, &exclude) {
                Some(candidate) => return Ok(Some(candidate)),
                None => break,
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CapabilityCategory, Priority, ProficiencyLevel, SubtaskType};

    fn agent(id: &str) -> Agent {
        Agent::new(id, id, "openai").with_capability(CapabilityCategory::Research, ProficiencyLevel::Expert)
    }

    #[test]
    fn five_consecutive_failures_open_the_circuit() {
        let manager = FallbackManager::new(FallbackConfig::default());
        for _ in 0..5 {
            manager.record_failure("a1");
        }
        let health = manager.health_snapshot("a1").unwrap();
        assert_eq!(health.status, HealthStatus::CircuitOpen);
        assert!(health.circuit_breaker_open_until.is_some());
    }

    #[test]
    fn three_consecutive_failures_degrade_but_do_not_open_circuit() {
        let manager = FallbackManager::new(FallbackConfig::default());
        for _ in 0..3 {
            manager.record_failure("a1");
        }
        let health = manager.health_snapshot("a1").unwrap();
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[test]
    fn circuit_open_agent_is_excluded_from_selection() {
        let manager = FallbackManager::new(FallbackConfig::default());
        for _ in 0..5 {
            manager.record_failure("a1");
        }
        let a1 = agent("a1");
        let a2 = agent("a2");
        let subtask = Subtask::new("wf", "t", "d", SubtaskType::Research, Priority::Medium);
        let selected = manager.select_agent(&subtask, &[&a1, &a2], &HashSet::new());
        assert_eq!(selected.unwrap().id, "a2");
    }

    #[test]
    fn success_resets_consecutive_failures_and_heals_degraded() {
        let manager = FallbackManager::new(FallbackConfig::default());
        for _ in 0..3 {
            manager.record_failure("a1");
        }
        manager.record_success("a1", 120.0);
        let health = manager.health_snapshot("a1").unwrap();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.status, HealthStatus::Healthy);
    }
}
