//! Error taxonomy shared by every component of the orchestrator and engine.

use thiserror::Error;

/// Error kinds the orchestrator and strategy engine can produce.
///
/// Transient protocol errors are handled inside a strategy (narrowing a
/// search, falling back to `Inconclusive`) and never surface here; only
/// strategy-terminal and framework-level failures reach this type.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("no service available for account: {0}")]
    NoConnection(String),

    #[error("internal wiring fault: {0}")]
    FrameworkFault(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("store refused the write: {0}")]
    EnqueueFailed(String),

    #[error("action timed out")]
    Timeout,

    #[error("cancelled")]
    Cancel,

    #[error("service was torn down under the action")]
    InternalStateReset,
}

impl From<rusqlite::Error> for OrchestratorError {
    fn from(e: rusqlite::Error) -> Self {
        OrchestratorError::EnqueueFailed(e.to_string())
    }
}

impl From<r2d2::Error> for OrchestratorError {
    fn from(e: r2d2::Error) -> Self {
        OrchestratorError::EnqueueFailed(e.to_string())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        OrchestratorError::FrameworkFault(e.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::InvalidData(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
