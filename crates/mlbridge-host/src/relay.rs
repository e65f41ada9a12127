//! Worker relay: a second runtime in a background execution context.
//!
//! The relay owns a dedicated thread with its own single-threaded tokio
//! runtime. The controlling context talks to it through a [`WorkerHandle`]
//! using [`WorkerMessage`] envelopes: one `Start` in, any number of
//! `Progress` and exactly one `Complete` out. Events are forwarded in the
//! order the hosted runtime emitted them, without buffering of its own.
//!
//! A `Start` that arrives while a run is in progress is answered with
//! `Rejected` and does not disturb the run. After `Complete` the relay shuts
//! down; posting to it afterwards fails with [`BridgeError::ChannelClosed`].

use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use mlbridge_core::{RelayState, RunId, WorkerEvent, WorkerMessage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::BridgeError;
use crate::host::{FsHost, HostConfig};
use crate::ports::ProgressSink;
use crate::program::{TestFlags, TestProgram, TrainFlags, TrainProgram};
use crate::registry::TaskRegistry;
use crate::runtime::run_bridge;

/// Ports of a runtime hosted by a relay.
pub struct WorkerPorts {
    /// Start payloads forwarded from the controlling context.
    pub on_start: mpsc::UnboundedReceiver<Value>,
    /// Events for the controlling context.
    pub events: mpsc::UnboundedSender<WorkerEvent>,
}

/// A runtime that can be hosted inside a worker relay.
#[async_trait]
pub trait WorkerRuntime: Send + 'static {
    /// Serve start payloads until the ports close.
    async fn run(self: Box<Self>, ports: WorkerPorts);
}

/// Controlling-context end of a running relay.
pub struct WorkerHandle {
    inbox: mpsc::UnboundedSender<WorkerMessage>,
    outbox: mpsc::UnboundedReceiver<WorkerMessage>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Post a message to the worker.
    pub fn post_message(&self, message: WorkerMessage) -> Result<(), BridgeError> {
        debug!(kind = message.kind(), "Posting message to worker");
        self.inbox
            .send(message)
            .map_err(|_| BridgeError::ChannelClosed)
    }

    /// Next message from the worker, `None` once the relay has shut down.
    pub async fn next_message(&mut self) -> Option<WorkerMessage> {
        self.outbox.recv().await
    }

    /// Blocking variant of [`next_message`](Self::next_message) for callers
    /// outside any async runtime.
    pub fn blocking_next_message(&mut self) -> Option<WorkerMessage> {
        self.outbox.blocking_recv()
    }

    /// Wait for the background thread to exit.
    pub fn join(mut self) -> Result<(), BridgeError> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| BridgeError::Worker("worker thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

/// Spawns worker relays.
pub struct WorkerRelay;

impl WorkerRelay {
    /// Start a relay hosting `runtime` on a new background thread.
    pub fn spawn(runtime: Box<dyn WorkerRuntime>) -> Result<WorkerHandle, BridgeError> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

        let thread = thread::Builder::new()
            .name("mlbridge-worker".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(error = %e, "Failed to create worker runtime");
                        return;
                    }
                };
                rt.block_on(relay_loop(runtime, inbox_rx, outbox_tx));
            })?;

        Ok(WorkerHandle {
            inbox: inbox_tx,
            outbox: outbox_rx,
            thread: Some(thread),
        })
    }
}

async fn relay_loop(
    runtime: Box<dyn WorkerRuntime>,
    mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    outbox: mpsc::UnboundedSender<WorkerMessage>,
) {
    let run_id = RunId::generate();
    let (start_tx, start_rx) = mpsc::unbounded_channel();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let inner = tokio::spawn(runtime.run(WorkerPorts {
        on_start: start_rx,
        events: event_tx,
    }));

    let forward = |message: WorkerMessage| {
        debug!(run_id = %run_id, kind = message.kind(), "Forwarding worker message");
        if outbox.send(message).is_err() {
            warn!(run_id = %run_id, "Controlling context is gone");
            return false;
        }
        true
    };

    info!(run_id = %run_id, "Worker relay started");
    let mut state = RelayState::Idle;
    let mut inbox_open = true;

    loop {
        tokio::select! {
            biased;

            event = events.recv() => match event {
                Some(WorkerEvent::Progress(payload)) => {
                    if !state.accepts_progress() {
                        warn!(run_id = %run_id, state = ?state, "Dropping progress outside a run");
                        continue;
                    }
                    if !forward(WorkerMessage::Progress(payload)) {
                        break;
                    }
                }
                Some(WorkerEvent::Complete(payload)) => match state.complete() {
                    Ok(next) => {
                        state = next;
                        // Closed before Complete is visible, so a post made in
                        // reaction to it fails instead of being lost.
                        close_inbox(&mut inbox, &forward);
                        forward(WorkerMessage::Complete(payload));
                        break;
                    }
                    Err(e) => warn!(run_id = %run_id, error = %e, "Dropping stray completion"),
                },
                None => {
                    warn!(run_id = %run_id, state = ?state, "Hosted runtime exited");
                    break;
                }
            },

            message = inbox.recv(), if inbox_open => match message {
                Some(WorkerMessage::Start(payload)) => match state.start() {
                    Ok(next) => {
                        state = next;
                        info!(run_id = %run_id, "Run started");
                        if start_tx.send(payload).is_err() {
                            warn!(run_id = %run_id, "Hosted runtime no longer accepts starts");
                        }
                    }
                    Err(e) => {
                        warn!(run_id = %run_id, error = %e, "Rejecting start");
                        if !forward(WorkerMessage::Rejected(format!("run already in progress ({})", e))) {
                            break;
                        }
                    }
                },
                Some(other) => {
                    warn!(run_id = %run_id, kind = other.kind(), "Rejecting unexpected inbound message");
                    if !forward(WorkerMessage::Rejected(format!(
                        "'{}' messages only flow out of a worker",
                        other.kind()
                    ))) {
                        break;
                    }
                }
                None => {
                    inbox_open = false;
                    if state == RelayState::Idle {
                        info!(run_id = %run_id, "Controlling context closed before start");
                        break;
                    }
                }
            },
        }
    }

    close_inbox(&mut inbox, &forward);
    inner.abort();
    info!(
        run_id = %run_id,
        state = ?state,
        completed = state.is_terminal(),
        "Worker relay stopped"
    );
    drop(outbox);
}

/// Stop accepting posts and answer anything already queued with `Rejected`.
fn close_inbox(
    inbox: &mut mpsc::UnboundedReceiver<WorkerMessage>,
    forward: &impl Fn(WorkerMessage) -> bool,
) {
    inbox.close();
    while let Ok(message) = inbox.try_recv() {
        warn!(kind = message.kind(), "Rejecting message posted during shutdown");
        forward(WorkerMessage::Rejected(format!(
            "worker is shutting down, '{}' was not handled",
            message.kind()
        )));
    }
}

/// Command carried by a `Start` payload for [`ProgramWorker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    Train(TrainFlags),
    Test(TestFlags),
}

/// Runs the train or test program inside a relay, with its own dispatcher.
///
/// Completes with `{"ok": true, "result": ...}` or
/// `{"ok": false, "error": "..."}`.
#[derive(Debug, Clone)]
pub struct ProgramWorker {
    host: Arc<FsHost>,
}

impl ProgramWorker {
    pub fn new(config: HostConfig) -> Self {
        Self {
            host: Arc::new(FsHost::new(config)),
        }
    }

    async fn execute(&self, payload: Value, progress: ProgressSink) -> Result<Value, BridgeError> {
        let command: WorkerCommand = serde_json::from_value(payload)?;
        match command {
            WorkerCommand::Train(flags) => {
                run_bridge(
                    Box::new(TrainProgram::new(flags)),
                    TaskRegistry::train(self.host.clone()),
                    progress,
                )
                .await
            }
            WorkerCommand::Test(flags) => {
                run_bridge(
                    Box::new(TestProgram::new(flags)),
                    TaskRegistry::test(self.host.clone()),
                    progress,
                )
                .await
            }
        }
    }
}

#[async_trait]
impl WorkerRuntime for ProgramWorker {
    async fn run(self: Box<Self>, mut ports: WorkerPorts) {
        while let Some(payload) = ports.on_start.recv().await {
            let progress = ProgressSink::new(ports.events.clone());
            let completion = match self.execute(payload, progress).await {
                Ok(result) => json!({ "ok": true, "result": result }),
                Err(e) => {
                    error!(error = %e, "Worker run failed");
                    json!({ "ok": false, "error": e.to_string() })
                }
            };
            if ports.events.send(WorkerEvent::Complete(completion)).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Emits a fixed number of progress events, then completes.
    struct CountingRuntime {
        steps: u32,
    }

    #[async_trait]
    impl WorkerRuntime for CountingRuntime {
        async fn run(self: Box<Self>, mut ports: WorkerPorts) {
            while let Some(payload) = ports.on_start.recv().await {
                for step in 0..self.steps {
                    ports.events.send(WorkerEvent::Progress(json!(step))).ok();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                ports
                    .events
                    .send(WorkerEvent::Complete(json!({ "echo": payload })))
                    .ok();
            }
        }
    }

    /// Completes twice for a single start.
    struct ChattyRuntime;

    #[async_trait]
    impl WorkerRuntime for ChattyRuntime {
        async fn run(self: Box<Self>, mut ports: WorkerPorts) {
            if ports.on_start.recv().await.is_some() {
                ports.events.send(WorkerEvent::Complete(json!(1))).ok();
                ports.events.send(WorkerEvent::Complete(json!(2))).ok();
                ports.events.send(WorkerEvent::Progress(json!(3))).ok();
            }
        }
    }

    fn drain(handle: &mut WorkerHandle) -> Vec<WorkerMessage> {
        let mut messages = Vec::new();
        while let Some(message) = handle.blocking_next_message() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_progress_precedes_single_complete() {
        let mut handle = WorkerRelay::spawn(Box::new(CountingRuntime { steps: 5 })).unwrap();
        handle.post_message(WorkerMessage::Start(json!("go"))).unwrap();

        let messages = drain(&mut handle);
        let (last, progress) = messages.split_last().unwrap();

        assert_eq!(*last, WorkerMessage::Complete(json!({ "echo": "go" })));
        let expected: Vec<WorkerMessage> =
            (0..5).map(|i| WorkerMessage::Progress(json!(i))).collect();
        assert_eq!(progress, expected.as_slice());
        handle.join().unwrap();
    }

    #[test]
    fn test_complete_forwarded_at_most_once() {
        let mut handle = WorkerRelay::spawn(Box::new(ChattyRuntime)).unwrap();
        handle.post_message(WorkerMessage::Start(Value::Null)).unwrap();

        let messages = drain(&mut handle);
        assert_eq!(messages, vec![WorkerMessage::Complete(json!(1))]);
        handle.join().unwrap();
    }

    #[test]
    fn test_second_start_is_rejected() {
        let mut handle = WorkerRelay::spawn(Box::new(CountingRuntime { steps: 20 })).unwrap();
        handle.post_message(WorkerMessage::Start(json!("first"))).unwrap();
        handle.post_message(WorkerMessage::Start(json!("second"))).unwrap();

        let messages = drain(&mut handle);
        let rejected = messages
            .iter()
            .filter(|m| matches!(m, WorkerMessage::Rejected(_)))
            .count();
        let completes: Vec<_> = messages
            .iter()
            .filter(|m| matches!(m, WorkerMessage::Complete(_)))
            .collect();

        assert_eq!(rejected, 1);
        assert_eq!(completes, vec![&WorkerMessage::Complete(json!({ "echo": "first" }))]);
        assert!(matches!(messages.last(), Some(WorkerMessage::Complete(_))));
        handle.join().unwrap();
    }

    #[test]
    fn test_post_after_terminal_fails() {
        let mut handle = WorkerRelay::spawn(Box::new(CountingRuntime { steps: 0 })).unwrap();
        handle.post_message(WorkerMessage::Start(Value::Null)).unwrap();
        drain(&mut handle);

        let err = handle
            .post_message(WorkerMessage::Start(Value::Null))
            .unwrap_err();
        assert!(matches!(err, BridgeError::ChannelClosed));
    }

    #[test]
    fn test_post_right_after_complete_fails() {
        for _ in 0..50 {
            let mut handle = WorkerRelay::spawn(Box::new(CountingRuntime { steps: 0 })).unwrap();
            handle.post_message(WorkerMessage::Start(Value::Null)).unwrap();

            loop {
                match handle.blocking_next_message() {
                    Some(WorkerMessage::Complete(_)) => break,
                    Some(_) => continue,
                    None => panic!("Relay stopped before completing"),
                }
            }

            let err = handle
                .post_message(WorkerMessage::Start(Value::Null))
                .unwrap_err();
            assert!(matches!(err, BridgeError::ChannelClosed));
            assert_eq!(handle.blocking_next_message(), None);
        }
    }

    #[test]
    fn test_outbound_kinds_are_rejected_inbound() {
        let mut handle = WorkerRelay::spawn(Box::new(CountingRuntime { steps: 0 })).unwrap();
        handle.post_message(WorkerMessage::Progress(json!(1))).unwrap();

        let reply = handle.blocking_next_message().unwrap();
        assert!(matches!(reply, WorkerMessage::Rejected(ref r) if r.contains("progress")));

        handle.post_message(WorkerMessage::Start(Value::Null)).unwrap();
        assert!(matches!(
            handle.blocking_next_message(),
            Some(WorkerMessage::Complete(_))
        ));
    }

    #[test]
    fn test_program_worker_trains_in_background() {
        let dir = tempfile::TempDir::new().unwrap();
        let data = dir.path().join("mnist_train.csv");
        std::fs::write(&data, "1,0\n2,1\n3,0\n").unwrap();

        let worker = ProgramWorker::new(HostConfig {
            models_dir: dir.path().join("models"),
            reports_dir: dir.path().join("reports"),
        });
        let mut handle = WorkerRelay::spawn(Box::new(worker)).unwrap();

        let command = WorkerCommand::Train(TrainFlags {
            data_path: data,
            data_limit: None,
            learning_rate: 0.01,
            activation_function: "tanh".to_string(),
            seed: 42,
            neurons: vec![100],
        });
        handle
            .post_message(WorkerMessage::Start(serde_json::to_value(&command).unwrap()))
            .unwrap();

        let messages = drain(&mut handle);
        let (last, progress) = messages.split_last().unwrap();
        assert!(!progress.is_empty());
        assert!(progress
            .iter()
            .all(|m| matches!(m, WorkerMessage::Progress(_))));

        match last {
            WorkerMessage::Complete(payload) => {
                assert_eq!(payload["ok"], true);
                assert_eq!(payload["result"]["samples"], 3);
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_program_worker_reports_bad_start_payload() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut handle =
            WorkerRelay::spawn(Box::new(ProgramWorker::new(HostConfig {
                models_dir: dir.path().join("models"),
                reports_dir: dir.path().join("reports"),
            })))
            .unwrap();

        handle
            .post_message(WorkerMessage::Start(json!({ "command": "dance" })))
            .unwrap();

        match drain(&mut handle).pop() {
            Some(WorkerMessage::Complete(payload)) => assert_eq!(payload["ok"], false),
            other => panic!("Expected Complete, got {:?}", other),
        }
    }
}
