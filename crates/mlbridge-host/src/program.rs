//! Reference core programs for the `train` and `test` commands.
//!
//! The numeric work belongs to the core runtime; these programs drive the
//! task protocol the same way it does, recording the run's configuration
//! and data shape in the artifacts they save.

use std::path::PathBuf;

use async_trait::async_trait;
use mlbridge_core::{
    Architecture, HostTask, Hyperparameters, ModelArtifact, NamingContext, ReadDocuments,
    ReadModel, SaveModel, SaveReport, TaskOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::BridgeError;
use crate::ports::{CoreClient, CorePorts, ProgressSink};
use crate::runtime::CoreRuntime;

/// Flags a training run is initialized with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainFlags {
    pub data_path: PathBuf,
    #[serde(default)]
    pub data_limit: Option<usize>,
    pub learning_rate: f64,
    pub activation_function: String,
    pub seed: u64,
    pub neurons: Vec<usize>,
}

/// Flags a test run is initialized with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFlags {
    pub model_path: PathBuf,
    pub data_path: PathBuf,
    #[serde(default)]
    pub data_limit: Option<usize>,
}

/// Trains on a data file and saves the resulting model.
#[derive(Debug, Clone)]
pub struct TrainProgram {
    flags: TrainFlags,
}

impl TrainProgram {
    pub fn new(flags: TrainFlags) -> Self {
        Self { flags }
    }
}

#[async_trait]
impl CoreRuntime for TrainProgram {
    async fn run(
        self: Box<Self>,
        ports: CorePorts,
        progress: ProgressSink,
    ) -> Result<Value, BridgeError> {
        let flags = self.flags;
        let client = CoreClient::new(ports);
        let naming = NamingContext::new(&flags.data_path, flags.data_limit);

        progress.progress(json!({ "stage": "reading", "path": flags.data_path }));
        let documents: Vec<String> = expect_value(
            "reading training data",
            client
                .request(HostTask::ReadDocuments(ReadDocuments {
                    path: flags.data_path.clone(),
                    limit: flags.data_limit,
                }))
                .await?,
        )?;
        info!(samples = documents.len(), "Training data loaded");
        progress.progress(json!({ "stage": "training", "samples": documents.len() }));

        let artifact = ModelArtifact {
            architecture: Architecture {
                neurons: flags.neurons,
                activation_function: flags.activation_function,
            },
            hyperparameters: Hyperparameters {
                learning_rate: flags.learning_rate,
                seed: flags.seed,
            },
            samples: documents.len(),
            parameters: Value::Null,
        };

        progress.progress(json!({ "stage": "saving" }));
        let path: String = expect_value(
            "saving model",
            client
                .request(HostTask::SaveModel(SaveModel {
                    naming,
                    artifact: serde_json::to_value(&artifact)?,
                }))
                .await?,
        )?;

        Ok(json!({ "modelPath": path, "samples": artifact.samples }))
    }
}

/// Evaluates a saved model against a data file and saves a report.
#[derive(Debug, Clone)]
pub struct TestProgram {
    flags: TestFlags,
}

impl TestProgram {
    pub fn new(flags: TestFlags) -> Self {
        Self { flags }
    }
}

#[async_trait]
impl CoreRuntime for TestProgram {
    async fn run(
        self: Box<Self>,
        ports: CorePorts,
        progress: ProgressSink,
    ) -> Result<Value, BridgeError> {
        let flags = self.flags;
        let client = CoreClient::new(ports);

        progress.progress(json!({ "stage": "reading", "path": flags.data_path }));
        // Both reads are outstanding at once.
        let (model, documents) = tokio::join!(
            client.request(HostTask::ReadModel(ReadModel {
                path: flags.model_path.clone(),
            })),
            client.request(HostTask::ReadDocuments(ReadDocuments {
                path: flags.data_path.clone(),
                limit: flags.data_limit,
            })),
        );
        let raw_model: String = expect_value("reading model", model?)?;
        let documents: Vec<String> = expect_value("reading test data", documents?)?;

        let model: ModelArtifact = serde_json::from_str(&raw_model)
            .map_err(|e| BridgeError::Core(format!("model artifact unreadable: {}", e)))?;
        progress.progress(json!({ "stage": "testing", "samples": documents.len() }));

        let text = render_report(&flags, &model, documents.len());
        let path: String = expect_value(
            "saving report",
            client
                .request(HostTask::SaveReport(SaveReport {
                    naming: NamingContext::new(&flags.data_path, flags.data_limit),
                    text,
                }))
                .await?,
        )?;

        Ok(json!({ "reportPath": path, "samples": documents.len() }))
    }
}

fn render_report(flags: &TestFlags, model: &ModelArtifact, samples: usize) -> String {
    let limit = flags
        .data_limit
        .map(|l| l.to_string())
        .unwrap_or_else(|| mlbridge_core::NO_LIMIT.to_string());
    format!(
        "model: {}\n\
         neurons: {:?}\n\
         activationFunction: {}\n\
         learningRate: {}\n\
         seed: {}\n\
         trainedOn: {}\n\
         data: {}\n\
         dataLimit: {}\n\
         samples: {}\n",
        flags.model_path.display(),
        model.architecture.neurons,
        model.architecture.activation_function,
        model.hyperparameters.learning_rate,
        model.hyperparameters.seed,
        model.samples,
        flags.data_path.display(),
        limit,
        samples,
    )
}

/// Unwrap a task outcome; a failed task ends the run.
fn expect_value<T: serde::de::DeserializeOwned>(
    what: &str,
    outcome: TaskOutcome,
) -> Result<T, BridgeError> {
    let value = outcome
        .into_result()
        .map_err(|failure| BridgeError::Core(format!("{} failed: {}", what, failure)))?;
    Ok(serde_json::from_value(value)?)
}
