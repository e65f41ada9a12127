//! Task envelopes exchanged between the core runtime and the host.
//!
//! The core emits [`TaskRequest`]s on its `send` port and receives exactly one
//! [`TaskResult`] per request on its `receive` port, correlated by
//! [`RequestId`]. The task namespace is closed: every name the host knows is a
//! [`TaskName`] variant and every decoded request is a [`HostTask`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::NamingContext;
use crate::error::CoreError;
use crate::ids::RequestId;

/// Names of the tasks a host can execute on behalf of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskName {
    /// Read a data file as lines.
    #[serde(rename = "cli:readDocuments")]
    ReadDocuments,
    /// Read a saved model artifact as raw text.
    #[serde(rename = "cli:readModel")]
    ReadModel,
    /// Persist a model artifact.
    #[serde(rename = "cli:saveModel")]
    SaveModel,
    /// Persist a test report.
    #[serde(rename = "cli:saveReport")]
    SaveReport,
}

impl TaskName {
    /// Every task name, in declaration order.
    pub const ALL: [TaskName; 4] = [
        Self::ReadDocuments,
        Self::ReadModel,
        Self::SaveModel,
        Self::SaveReport,
    ];

    /// Wire name of the task.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadDocuments => "cli:readDocuments",
            Self::ReadModel => "cli:readModel",
            Self::SaveModel => "cli:saveModel",
            Self::SaveReport => "cli:saveReport",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| CoreError::UnknownTask(s.to_string()))
    }
}

/// Input of `cli:readDocuments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadDocuments {
    pub path: PathBuf,
    /// Keep only the first `limit` lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Input of `cli:readModel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadModel {
    pub path: PathBuf,
}

/// Input of `cli:saveModel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveModel {
    pub naming: NamingContext,
    /// Opaque artifact; the host only serializes it.
    pub artifact: Value,
}

/// Input of `cli:saveReport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReport {
    pub naming: NamingContext,
    pub text: String,
}

/// A decoded task, one variant per [`TaskName`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostTask {
    ReadDocuments(ReadDocuments),
    ReadModel(ReadModel),
    SaveModel(SaveModel),
    SaveReport(SaveReport),
}

impl HostTask {
    /// Name of this task.
    pub fn name(&self) -> TaskName {
        match self {
            Self::ReadDocuments(_) => TaskName::ReadDocuments,
            Self::ReadModel(_) => TaskName::ReadModel,
            Self::SaveModel(_) => TaskName::SaveModel,
            Self::SaveReport(_) => TaskName::SaveReport,
        }
    }

    /// Decode the input of a named task.
    pub fn decode(name: TaskName, input: Value) -> Result<Self, CoreError> {
        let invalid = |e: serde_json::Error| CoreError::InvalidInput {
            task: name.to_string(),
            reason: e.to_string(),
        };

        let task = match name {
            TaskName::ReadDocuments => {
                Self::ReadDocuments(serde_json::from_value(input).map_err(invalid)?)
            }
            TaskName::ReadModel => Self::ReadModel(serde_json::from_value(input).map_err(invalid)?),
            TaskName::SaveModel => Self::SaveModel(serde_json::from_value(input).map_err(invalid)?),
            TaskName::SaveReport => {
                Self::SaveReport(serde_json::from_value(input).map_err(invalid)?)
            }
        };
        Ok(task)
    }

    /// Encode this task's input back into an opaque value.
    pub fn input(&self) -> Result<Value, CoreError> {
        let value = match self {
            Self::ReadDocuments(input) => serde_json::to_value(input)?,
            Self::ReadModel(input) => serde_json::to_value(input)?,
            Self::SaveModel(input) => serde_json::to_value(input)?,
            Self::SaveReport(input) => serde_json::to_value(input)?,
        };
        Ok(value)
    }

    /// Wrap this task in a request envelope.
    pub fn into_request(self, id: RequestId) -> Result<TaskRequest, CoreError> {
        Ok(TaskRequest {
            id,
            name: self.name().as_str().to_string(),
            input: self.input()?,
        })
    }
}

/// Request envelope emitted by the core.
///
/// `name` stays a plain string on the wire so that a name outside the
/// namespace can still be reported together with its `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: RequestId,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

impl TaskRequest {
    /// Resolve the name and decode the input.
    pub fn decode(&self) -> Result<HostTask, CoreError> {
        let name: TaskName = self.name.parse()?;
        HostTask::decode(name, self.input.clone())
    }
}

/// Kind of a recoverable task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// File unreadable or unwritable.
    #[serde(rename = "IOError")]
    IoError,
    /// The host function panicked.
    #[serde(rename = "InternalError")]
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError => f.write_str("IOError"),
            Self::Internal => f.write_str("InternalError"),
        }
    }
}

/// Failure reported to the core as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskFailure {
    /// Create an IOError failure.
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::IoError,
            message: message.into(),
        }
    }

    /// Create an InternalError failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Ok { value: Value },
    Err { error: TaskFailure },
}

impl TaskOutcome {
    /// Returns true for a successful outcome.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Convert into a standard `Result`.
    pub fn into_result(self) -> Result<Value, TaskFailure> {
        match self {
            Self::Ok { value } => Ok(value),
            Self::Err { error } => Err(error),
        }
    }
}

impl From<Result<Value, TaskFailure>> for TaskOutcome {
    fn from(result: Result<Value, TaskFailure>) -> Self {
        match result {
            Ok(value) => Self::Ok { value },
            Err(error) => Self::Err { error },
        }
    }
}

/// Result envelope delivered to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: RequestId,
    pub outcome: TaskOutcome,
}
