//! Filesystem implementations of the host tasks.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mlbridge_core::{ReadDocuments, ReadModel, SaveModel, SaveReport};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::TaskError;
use crate::registry::HostTasks;

/// Where a host writes its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Root of the model directories.
    pub models_dir: PathBuf,
    /// Directory receiving test reports.
    pub reports_dir: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

/// Host tasks backed by the local filesystem.
///
/// File handles live only for the duration of one task.
#[derive(Debug, Clone, Default)]
pub struct FsHost {
    config: HostConfig,
}

impl FsHost {
    /// Create a host writing under the configured directories.
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl HostTasks for FsHost {
    async fn read_documents(&self, input: ReadDocuments) -> Result<Vec<String>, TaskError> {
        info!(path = %input.path.display(), limit = ?input.limit, "cli:readDocuments");
        let content = tokio::fs::read_to_string(&input.path)
            .await
            .map_err(TaskError::io("read", &input.path))?;

        let lines = content.lines().map(str::to_owned);
        let documents: Vec<String> = match input.limit {
            Some(limit) => lines.take(limit).collect(),
            None => lines.collect(),
        };

        debug!(documents = documents.len(), "Documents read");
        Ok(documents)
    }

    async fn read_model(&self, input: ReadModel) -> Result<String, TaskError> {
        info!(path = %input.path.display(), "cli:readModel");
        tokio::fs::read_to_string(&input.path)
            .await
            .map_err(TaskError::io("read", &input.path))
    }

    async fn save_model(&self, input: SaveModel) -> Result<PathBuf, TaskError> {
        let json = serde_json::to_string(&input.artifact)?;

        let dir = input.naming.model_dir(&self.config.models_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(TaskError::io("create", &dir))?;

        let path = input.naming.model_path(&self.config.models_dir);
        write_new(&path, json.as_bytes()).await?;

        info!(path = %path.display(), bytes = json.len(), "cli:saveModel");
        Ok(path)
    }

    async fn save_report(&self, input: SaveReport) -> Result<PathBuf, TaskError> {
        let dir = &self.config.reports_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(TaskError::io("create", dir))?;

        let path = input.naming.report_path(dir);
        write_new(&path, input.text.as_bytes()).await?;

        info!(path = %path.display(), bytes = input.text.len(), "cli:saveReport");
        Ok(path)
    }
}

/// Write a file that must not exist yet.
async fn write_new(path: &Path, contents: &[u8]) -> Result<(), TaskError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(TaskError::io("create", path))?;
    file.write_all(contents)
        .await
        .map_err(TaskError::io("write", path))?;
    file.flush().await.map_err(TaskError::io("write", path))?;
    Ok(())
}
