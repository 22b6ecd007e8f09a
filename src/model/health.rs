use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Per-agent health state tracked exclusively by the fallback manager (C7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
    CircuitOpen,
}

/// Rolling health record for one agent, per §3/§4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    /// Last N (default 100) outcomes, most recent last; `true` = success.
    #[serde(default)]
    pub outcome_window: VecDeque<bool>,
    /// EWMA(alpha=0.2) of response time in milliseconds.
    pub avg_response_time_ms: f64,
    pub in_flight: usize,
    pub circuit_breaker_open_until: Option<DateTime<Utc>>,
}

const OUTCOME_WINDOW_SIZE: usize = 100;
const EWMA_ALPHA: f64 = 0.2;

impl AgentHealth {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            outcome_window: VecDeque::with_capacity(OUTCOME_WINDOW_SIZE),
            avg_response_time_ms: 0.0,
            in_flight: 0,
            circuit_breaker_open_until: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.outcome_window.is_empty() {
            return 1.0;
        }
        let successes = self.outcome_window.iter().filter(|&&ok| ok).count();
        successes as f64 / self.outcome_window.len() as f64
    }

    pub fn record_outcome(&mut self, success: bool) {
        if self.outcome_window.len() >= OUTCOME_WINDOW_SIZE {
            self.outcome_window.pop_front();
        }
        self.outcome_window.push_back(success);
    }

    pub fn record_response_time(&mut self, elapsed_ms: f64) {
        if self.avg_response_time_ms == 0.0 {
            self.avg_response_time_ms = elapsed_ms;
        } else {
            self.avg_response_time_ms =
                EWMA_ALPHA * elapsed_ms + (1.0 - EWMA_ALPHA) * self.avg_response_time_ms;
        }
    }

    pub fn is_circuit_open(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, HealthStatus::CircuitOpen)
            && self.circuit_breaker_open_until.is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_defaults_to_one_with_no_history() {
        let h = AgentHealth::new("a1");
        assert_eq!(h.success_rate(), 1.0);
    }

    #[test]
    fn outcome_window_caps_at_100_entries() {
        let mut h = AgentHealth::new("a1");
        for _ in 0..150 {
            h.record_outcome(true);
        }
        assert_eq!(h.outcome_window.len(), OUTCOME_WINDOW_SIZE);
    }

    #[test]
    fn ewma_moves_toward_new_samples() {
        let mut h = AgentHealth::new("a1");
        h.record_response_time(100.0);
        h.record_response_time(200.0);
        assert_eq!(h.avg_response_time_ms, 0.2 * 200.0 + 0.8 * 100.0);
    }
}
