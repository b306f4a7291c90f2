//! Error types for Keel operations

use crate::llm::InferenceError;

/// Result type for Keel operations
pub type Result<T> = std::result::Result<T, KeelError>;

/// Error types surfaced by the engine and the session lifecycle API.
///
/// Stage-level failures never show up here: they are recorded in the
/// session as failed step results (see [`crate::workflow::StageFailure`]).
#[derive(Debug, thiserror::Error)]
pub enum KeelError {
    /// No session with the given identifier is held by the store
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session has already reached a terminal status
    #[error("Session {0} has already finished")]
    SessionFinished(String),

    /// The session was cancelled before the requested stage
    #[error("Session {0} was cancelled")]
    Cancelled(String),

    /// A requested artifact was not produced by the session
    #[error("Not available: {0}")]
    NotAvailable(String),

    /// Invalid session input submitted at start
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model inference failed
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Chart or table rendering failed
    #[error("Render error: {0}")]
    Render(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for KeelError {
    fn from(s: String) -> Self {
        KeelError::Other(s)
    }
}

impl From<&str> for KeelError {
    fn from(s: &str) -> Self {
        KeelError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for KeelError {
    fn from(err: anyhow::Error) -> Self {
        KeelError::Other(err.to_string())
    }
}

impl From<crate::render::RenderError> for KeelError {
    fn from(err: crate::render::RenderError) -> Self {
        KeelError::Render(err.to_string())
    }
}

impl From<csv::Error> for KeelError {
    fn from(err: csv::Error) -> Self {
        KeelError::Render(err.to_string())
    }
}
