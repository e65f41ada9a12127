//! Envelope for the cross-context worker protocol.
//!
//! Each message carries its kind as an explicit `kind` discriminant next to an
//! opaque `payload`, so a message can never be routed by the channel it
//! happened to arrive on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message exchanged between a controlling context and a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Begin a run. Controlling -> worker.
    Start(Value),
    /// Intermediate run state. Worker -> controlling.
    Progress(Value),
    /// Final run result, exactly once per run. Worker -> controlling.
    Complete(Value),
    /// An inbound message the worker refused. Worker -> controlling.
    Rejected(String),
}

impl WorkerMessage {
    /// Short name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Progress(_) => "progress",
            Self::Complete(_) => "complete",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Event emitted by a runtime hosted inside a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress(Value),
    Complete(Value),
}

impl From<WorkerEvent> for WorkerMessage {
    fn from(event: WorkerEvent) -> Self {
        match event {
            WorkerEvent::Progress(payload) => Self::Progress(payload),
            WorkerEvent::Complete(payload) => Self::Complete(payload),
        }
    }
}
