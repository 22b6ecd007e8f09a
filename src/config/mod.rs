//! Layered configuration loading: defaults -> optional file -> env vars
//! prefixed `ORCH_` (C13, §4.11, §6).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::fallback::FallbackConfig;
use crate::matcher::MatcherConfig;
use crate::planner::BatchingConfig;
use crate::validator::ValidatorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_batches: usize,
    pub max_concurrent_subtasks: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 2,
            max_concurrent_subtasks: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 2.0,
            initial_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub subtask_timeout_ms: u64,
    pub batch_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            subtask_timeout_ms: 300_000,
            batch_timeout_ms: 1_800_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipassConfig {
    pub enabled: bool,
    pub max_passes: u32,
    pub improvement_threshold: f64,
}

impl Default for MultipassConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_passes: 3,
            improvement_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub interval_ms: u64,
    pub max_snapshots: usize,
    pub recovery_timeout_ms: i64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max_snapshots: 50,
            recovery_timeout_ms: 300_000,
        }
    }
}

/// The top-level bag of tunables every component reads from, composed per
/// §4.11: one typed struct per tunable group, each with a `Default` impl
/// carrying the documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub multipass: MultipassConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
}

impl OrchestratorConfig {
    /// Loads defaults, layers an optional config file (TOML/YAML/JSON,
    /// inferred from extension) over them, then applies `ORCH_`-prefixed
    /// environment variable overrides via the `config` crate.
    pub fn load(file_path: Option<&Path>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&defaults)?);

        if let Some(path) = file_path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ORCH")
                .separator("__")
                .try_parsing(true),
        );

        let merged = builder.build()?;
        Ok(merged.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.concurrency.max_concurrent_batches, 2);
        assert_eq!(config.concurrency.max_concurrent_subtasks, 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.timeout.subtask_timeout_ms, 300_000);
        assert!(config.multipass.enabled);
        assert!(config.fallback.enabled);
        assert_eq!(config.snapshot.max_snapshots, 50);
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let config = OrchestratorConfig::load(None).unwrap();
        assert_eq!(config.concurrency.max_concurrent_batches, 2);
    }
}
