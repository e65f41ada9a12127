//! Error types for the effect bridge.

use std::path::PathBuf;

use mlbridge_core::{RequestId, TaskFailure};
use thiserror::Error;

/// Errors that abort a bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Unknown task name, unregistered task, or malformed envelope.
    ///
    /// Signals that the core and host disagree about the task namespace.
    #[error("Protocol error{}: {reason}", request_suffix(.id))]
    Protocol {
        id: Option<RequestId>,
        reason: String,
    },

    /// The peer end of a channel went away.
    #[error("Channel closed")]
    ChannelClosed,

    /// The core runtime gave up or crashed.
    #[error("Core runtime failed: {0}")]
    Core(String),

    /// The background worker context failed.
    #[error("Worker failed: {0}")]
    Worker(String),

    /// I/O error outside of a task boundary.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn request_suffix(id: &Option<RequestId>) -> String {
    id.as_ref()
        .map(|id| format!(" (request {})", id))
        .unwrap_or_default()
}

/// Errors raised inside a host task.
///
/// These never cross the bridge; the dispatcher turns them into
/// [`TaskFailure`] values for the core.
#[derive(Debug, Error)]
pub enum TaskError {
    /// File unreadable or unwritable.
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { op, path, source }
    }

    /// Convert into the failure value reported to the core.
    pub fn into_failure(self) -> TaskFailure {
        let message = self.to_string();
        match self {
            Self::Io { .. } => TaskFailure::io(message),
            Self::Serialization(_) => TaskFailure::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_keeps_request_id() {
        let err = BridgeError::Protocol {
            id: Some(RequestId::new("42")),
            reason: "unknown task".to_string(),
        };
        assert_eq!(err.to_string(), "Protocol error (request 42): unknown task");

        let anonymous = BridgeError::Protocol {
            id: None,
            reason: "malformed envelope".to_string(),
        };
        assert_eq!(anonymous.to_string(), "Protocol error: malformed envelope");
    }

    #[test]
    fn test_task_error_into_failure() {
        let err = TaskError::io("read", "missing.csv")(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not found",
        ));
        let failure = err.into_failure();

        assert_eq!(failure.kind, mlbridge_core::ErrorKind::IoError);
        assert!(failure.message.contains("missing.csv"));
    }

    #[test]
    fn test_serialization_error_is_internal() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let failure = TaskError::from(source).into_failure();

        assert_eq!(failure.kind, mlbridge_core::ErrorKind::Internal);
        assert!(failure.message.starts_with("Serialization error"));
    }
}
