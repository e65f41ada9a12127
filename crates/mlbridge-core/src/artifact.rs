//! Persisted artifacts and their naming convention.
//!
//! Every artifact path embeds the source data's base name, the sample limit
//! (or [`NO_LIMIT`]) and a token unique within the process, so concurrent
//! runs write into the shared directories without locking.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Limit token used when no sample limit is configured.
pub const NO_LIMIT: &str = "all";

static ARTIFACT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Run identity a save task derives artifact names from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamingContext {
    /// Data file the run consumed.
    pub source: PathBuf,
    /// Configured sample limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl NamingContext {
    /// Create a naming context.
    pub fn new(source: impl Into<PathBuf>, limit: Option<usize>) -> Self {
        Self {
            source: source.into(),
            limit,
        }
    }

    /// Base name of the source file without extension.
    pub fn source_stem(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "data".to_string())
    }

    /// The configured limit, or [`NO_LIMIT`].
    pub fn limit_token(&self) -> String {
        self.limit
            .map(|l| l.to_string())
            .unwrap_or_else(|| NO_LIMIT.to_string())
    }

    /// Directory under `models_dir` holding models of this run identity.
    pub fn model_dir(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(format!("{}-{}", self.source_stem(), self.limit_token()))
    }

    /// Fresh path for a model artifact.
    pub fn model_path(&self, models_dir: &Path) -> PathBuf {
        self.model_dir(models_dir)
            .join(format!("model-{}.json", unique_token()))
    }

    /// Fresh path for a report artifact.
    pub fn report_path(&self, reports_dir: &Path) -> PathBuf {
        reports_dir.join(format!(
            "report-{}-{}-{}.txt",
            self.source_stem(),
            self.limit_token(),
            unique_token()
        ))
    }
}

/// Millisecond timestamp plus a process-wide sequence number.
///
/// The sequence keeps tokens distinct when several saves land within the
/// same millisecond.
pub fn unique_token() -> String {
    let seq = ARTIFACT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}-{}-{:04}",
        Utc::now().format("%Y%m%dT%H%M%S%3f"),
        std::process::id(),
        seq
    )
}

/// Network shape recorded in a model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Architecture {
    /// Width of each hidden layer.
    pub neurons: Vec<usize>,
    pub activation_function: String,
}

/// Training hyperparameters recorded in a model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub seed: u64,
}

/// Snapshot of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub architecture: Architecture,
    pub hyperparameters: Hyperparameters,
    /// Number of samples the model was trained on.
    pub samples: usize,
    /// Learned parameters, opaque to the host.
    #[serde(default)]
    pub parameters: Value,
}
