//! Relay and transform error types.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// A terminal failure for one job. Always becomes a failure report.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{program} failed: {message}")]
    Tool { program: String, message: String },
    #[error("{0} not found; is it installed and on PATH?")]
    ToolNotFound(String),
    #[error("Expected output {0} was not produced")]
    MissingOutput(String),
    #[error("Transform timed out after {:?}", .0)]
    TimedOut(Duration),
    #[error("Expected a {expected} payload, got {found}")]
    UnexpectedPayload { expected: String, found: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode output: {0}")]
    Encode(String),
    #[error("{0}")]
    Other(String),
}

/// Failure of the relay itself, ending the current session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RelayError {
    /// Whether the session ended because the broker connection was lost.
    pub fn is_connection_level(&self) -> bool {
        match self {
            RelayError::Transport(e) => e.is_connection_level(),
        }
    }
}
