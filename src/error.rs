use std::time::Duration;
use thiserror::Error;

use crate::models::RunStage;

/// Error taxonomy of the engine. Transient service errors are retried inside
/// the adapters; whatever reaches the orchestrator is either recorded as the
/// run's terminal failure or returned to the caller as-is (conflict, invalid
/// resume, not found).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("invalid operation for run {run_id} in stage {stage}")]
    InvalidState { run_id: String, stage: RunStage },

    #[error("checkpoint version conflict for run {0}")]
    Conflict(String),

    #[error("period {0} has a terminal run; archive it before re-triggering")]
    PeriodBlocked(String),

    #[error("video generation exceeded budget of {0:?}")]
    VideoTimeout(Duration),

    #[error("{service} call failed: {message}")]
    Service {
        service: &'static str,
        message: String,
    },

    #[error("stage {stage} failed: {message}")]
    Stage { stage: RunStage, message: String },

    #[error("checkpoint store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn service(service: &'static str, err: impl std::fmt::Display) -> Self {
        EngineError::Service {
            service,
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Store(format!("state serialization failed: {}", e))
    }
}
