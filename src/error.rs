//! Closed error taxonomy carried on every subtask-level failure.
//!
//! A narrow `thiserror` type at the subtask-execution seam; `anyhow::Result`
//! covers operational glue elsewhere (config loading, store I/O).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of error kinds a subtask execution can fail with.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum OrchestratorError {
    #[error("agent API error: {message}")]
    ApiError { message: String },

    #[error("subtask timed out: {message}")]
    Timeout { message: String },

    #[error("cancelled: {message}")]
    Cancelled { message: String },

    #[error("validation failed: {message}")]
    ValidationError { message: String },

    #[error("system error: {message}")]
    SystemError { message: String },

    #[error("recovery error: {message}")]
    RecoveryError { message: String },

    #[error("dependency cycle could not be resolved: {message}")]
    CycleUnresolvable { message: String },
}

/// A fully-contextualized error record, the shape persisted into execution
/// state error logs and surfaced to reintegration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub subtask_id: Option<String>,
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
}

/// Tag-only view of [`OrchestratorError`], used where the message has
/// already been captured separately (e.g. snapshot checkpoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ApiError,
    Timeout,
    Cancelled,
    ValidationError,
    SystemError,
    RecoveryError,
    CycleUnresolvable,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::ApiError { .. } => ErrorKind::ApiError,
            OrchestratorError::Timeout { .. } => ErrorKind::Timeout,
            OrchestratorError::Cancelled { .. } => ErrorKind::Cancelled,
            OrchestratorError::ValidationError { .. } => ErrorKind::ValidationError,
            OrchestratorError::SystemError { .. } => ErrorKind::SystemError,
            OrchestratorError::RecoveryError { .. } => ErrorKind::RecoveryError,
            OrchestratorError::CycleUnresolvable { .. } => ErrorKind::CycleUnresolvable,
        }
    }

    /// Per §7: network/HTTP errors are retryable, timeouts are not retryable
    /// within the same subtask, malformed responses count as API errors.
    pub fn retryable(&self) -> bool {
        matches!(self, OrchestratorError::ApiError { .. })
    }

    pub fn into_record(self, subtask_id: Option<String>, agent_id: Option<String>) -> ErrorRecord {
        let retryable = self.retryable();
        let kind = self.kind();
        let message = self.to_string();
        ErrorRecord {
            kind,
            message,
            subtask_id,
            agent_id,
            timestamp: Utc::now(),
            retryable,
        }
    }
}
