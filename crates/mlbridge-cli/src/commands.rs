//! `train` and `test` command handlers.

use std::path::Path;
use std::sync::Arc;

use mlbridge_core::WorkerMessage;
use mlbridge_host::{
    run_bridge, BridgeError, FsHost, HostConfig, ProgramWorker, ProgressSink, TaskRegistry,
    TestProgram, TrainProgram, WorkerCommand, WorkerRelay,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{TestArgs, TrainArgs};

/// Errors surfaced by a command.
#[derive(Error, Debug)]
pub enum CliError {
    /// Bad input, reported before any runtime starts.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Fail early when an input file is missing.
pub fn ensure_exists(path: &Path) -> Result<(), CliError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CliError::Validation(format!(
            "File ({}) not found",
            path.display()
        )))
    }
}

/// Train a model and return the run's output.
pub async fn train(args: &TrainArgs, config: HostConfig) -> Result<Value, CliError> {
    ensure_exists(&args.data_path)?;
    let flags = args.flags();
    info!(data = %flags.data_path.display(), limit = ?flags.data_limit, "Training");

    if args.background {
        return run_in_worker(WorkerCommand::Train(flags), config).await;
    }

    let host = Arc::new(FsHost::new(config));
    let output = run_bridge(
        Box::new(TrainProgram::new(flags)),
        TaskRegistry::train(host),
        ProgressSink::disabled(),
    )
    .await?;
    Ok(output)
}

/// Evaluate a model and return the run's output.
pub async fn test(args: &TestArgs, config: HostConfig) -> Result<Value, CliError> {
    ensure_exists(&args.model_path)?;
    ensure_exists(&args.data_path)?;
    let flags = args.flags();
    info!(model = %flags.model_path.display(), data = %flags.data_path.display(), "Testing");

    if args.background {
        return run_in_worker(WorkerCommand::Test(flags), config).await;
    }

    let host = Arc::new(FsHost::new(config));
    let output = run_bridge(
        Box::new(TestProgram::new(flags)),
        TaskRegistry::test(host),
        ProgressSink::disabled(),
    )
    .await?;
    Ok(output)
}

/// Run a command on a background worker, printing its progress.
async fn run_in_worker(command: WorkerCommand, config: HostConfig) -> Result<Value, CliError> {
    let mut worker = WorkerRelay::spawn(Box::new(ProgramWorker::new(config)))?;
    let payload = serde_json::to_value(&command).map_err(BridgeError::from)?;
    worker.post_message(WorkerMessage::Start(payload))?;

    let mut completion = None;
    while let Some(message) = worker.next_message().await {
        match message {
            WorkerMessage::Progress(payload) => println!("progress: {}", payload),
            WorkerMessage::Complete(payload) => completion = Some(payload),
            other => debug!(kind = other.kind(), "Ignoring worker message"),
        }
    }

    tokio::task::spawn_blocking(move || worker.join())
        .await
        .map_err(|e| BridgeError::Worker(format!("join failed: {}", e)))??;

    let completion = completion
        .ok_or_else(|| BridgeError::Worker("worker stopped without completing".to_string()))?;
    match completion.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(completion.get("result").cloned().unwrap_or(Value::Null)),
        _ => {
            let reason = completion
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown worker error");
            Err(BridgeError::Worker(reason.to_string()).into())
        }
    }
}
