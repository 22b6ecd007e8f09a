//! `agentflow`: dependency-aware AI-agent workflow orchestrator.
//!
//! Decomposes a workflow's subtasks into dependency-respecting batches
//! (`planner`), matches subtasks to agents (`matcher`), dispatches batches
//! concurrently under semaphores/timeouts/retries (`dispatcher`), validates
//! outputs (`validator`), falls back across agents on failure with circuit
//! breakers (`fallback`), snapshots execution state for crash recovery
//! (`state`), and reassembles per-subtask results into a final document
//! (`reintegration`). `controller` drives the whole lifecycle; `store` and
//! `keystore` are the pluggable persistence and secret-key boundaries;
//! `providers` holds the per-agent HTTP wire codecs.

pub mod cli;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod fallback;
pub mod keystore;
pub mod matcher;
pub mod model;
pub mod planner;
pub mod providers;
pub mod reintegration;
pub mod state;
pub mod store;
pub mod validator;
