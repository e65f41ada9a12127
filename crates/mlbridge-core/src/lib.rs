//! mlbridge Core Domain Types
//!
//! This crate contains the envelopes and artifacts shared by the core
//! runtime and the host, with no dependencies on:
//! - Async runtimes
//! - Filesystem access
//!
//! Everything here is plain data that can cross the core/host boundary.

pub mod artifact;
pub mod error;
pub mod ids;
pub mod message;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use artifact::{Architecture, Hyperparameters, ModelArtifact, NamingContext, NO_LIMIT};
pub use error::CoreError;
pub use ids::{RequestId, RunId};
pub use message::{WorkerEvent, WorkerMessage};
pub use status::{RelayState, ServiceWorkerState};
pub use task::{
    ErrorKind, HostTask, ReadDocuments, ReadModel, SaveModel, SaveReport, TaskFailure, TaskName,
    TaskOutcome, TaskRequest, TaskResult,
};
