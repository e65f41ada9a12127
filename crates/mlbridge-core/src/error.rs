//! Core domain errors.

use thiserror::Error;

/// Core domain errors for the bridge.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task name is not part of the host task namespace.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// Task input does not match the shape its task expects.
    #[error("Invalid input for task '{task}': {reason}")]
    InvalidInput { task: String, reason: String },

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
