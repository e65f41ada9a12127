//! Status enums for the worker relay and the service worker.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// State of a worker relay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayState {
    /// Waiting for a Start message.
    #[default]
    Idle,
    /// Start forwarded, Complete not yet seen.
    Running,
    /// Complete forwarded; the relay accepts nothing further.
    Terminal,
}

impl RelayState {
    /// Idle -> Running.
    pub fn start(self) -> Result<Self, CoreError> {
        match self {
            Self::Idle => Ok(Self::Running),
            other => Err(other.invalid("RUNNING")),
        }
    }

    /// Running -> Terminal.
    pub fn complete(self) -> Result<Self, CoreError> {
        match self {
            Self::Running => Ok(Self::Terminal),
            other => Err(other.invalid("TERMINAL")),
        }
    }

    /// Returns true while progress events are meaningful.
    pub fn accepts_progress(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true once the run is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }

    fn invalid(self, to: &str) -> CoreError {
        CoreError::InvalidStateTransition {
            from: format!("{:?}", self).to_uppercase(),
            to: to.to_string(),
        }
    }
}

/// Lifecycle of a service worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceWorkerState {
    /// Registered, install event not yet handled.
    #[default]
    Installing,
    /// Installed, waiting for older clients to release control.
    Waiting,
    /// Controlling clients and handling messages.
    Active,
}
