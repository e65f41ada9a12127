//! Host task registry.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use mlbridge_core::{HostTask, ReadDocuments, ReadModel, SaveModel, SaveReport, TaskName};
use serde_json::Value;

use crate::error::TaskError;

/// Host functions the core can ask for, one method per [`TaskName`].
///
/// Implement this trait to change where documents come from or where
/// artifacts are written.
#[async_trait]
pub trait HostTasks: Send + Sync {
    /// Read a data file as lines, keeping at most `limit` of them.
    async fn read_documents(&self, input: ReadDocuments) -> Result<Vec<String>, TaskError>;

    /// Read a model artifact as raw text.
    async fn read_model(&self, input: ReadModel) -> Result<String, TaskError>;

    /// Persist a model artifact and return its path.
    async fn save_model(&self, input: SaveModel) -> Result<PathBuf, TaskError>;

    /// Persist a report and return its path.
    async fn save_report(&self, input: SaveReport) -> Result<PathBuf, TaskError>;
}

/// The set of tasks a command exposes to its core, bound to a host.
///
/// Fixed once the dispatcher is wired.
#[derive(Clone)]
pub struct TaskRegistry {
    host: Arc<dyn HostTasks>,
    registered: HashSet<TaskName>,
}

impl TaskRegistry {
    /// Create an empty registry over `host`.
    pub fn new(host: Arc<dyn HostTasks>) -> Self {
        Self {
            host,
            registered: HashSet::new(),
        }
    }

    /// Tasks available to a training run.
    pub fn train(host: Arc<dyn HostTasks>) -> Self {
        Self::new(host)
            .register(TaskName::ReadDocuments)
            .register(TaskName::SaveModel)
    }

    /// Tasks available to a test run.
    pub fn test(host: Arc<dyn HostTasks>) -> Self {
        Self::new(host)
            .register(TaskName::ReadDocuments)
            .register(TaskName::ReadModel)
            .register(TaskName::SaveReport)
    }

    /// Expose a task to the core.
    pub fn register(mut self, name: TaskName) -> Self {
        self.registered.insert(name);
        self
    }

    /// Returns true if the task was registered.
    pub fn is_registered(&self, name: TaskName) -> bool {
        self.registered.contains(&name)
    }

    /// Run a task on the host and encode its output.
    pub async fn execute(&self, task: HostTask) -> Result<Value, TaskError> {
        let value = match task {
            HostTask::ReadDocuments(input) => {
                serde_json::to_value(self.host.read_documents(input).await?)?
            }
            HostTask::ReadModel(input) => Value::String(self.host.read_model(input).await?),
            HostTask::SaveModel(input) => path_value(self.host.save_model(input).await?),
            HostTask::SaveReport(input) => path_value(self.host.save_report(input).await?),
        };
        Ok(value)
    }
}

fn path_value(path: PathBuf) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}
