//! Errors surfaced synchronously by engine operations.

use streamkeeper_db::StoreError;
use streamkeeper_protocol::ValidationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or conflicting input; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Duplicate watcher, or a cancellation that cannot be carried out safely.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Store(StoreError),
}

impl EngineError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Store(_) => "internal",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => EngineError::NotFound(msg),
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            err @ StoreError::TerminalState { .. } => EngineError::Conflict(err.to_string()),
            other => EngineError::Store(other),
        }
    }
}
