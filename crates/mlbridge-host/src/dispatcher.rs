//! Task dispatch between a core runtime and the host.
//!
//! The dispatcher listens on the core's `send` port, executes each request
//! against the [`TaskRegistry`], and answers on the `receive` port with a
//! result carrying the request's id. Requests run concurrently; results go
//! back in completion order.

use std::collections::HashSet;
use std::sync::Arc;

use mlbridge_core::{HostTask, RequestId, TaskFailure, TaskOutcome, TaskRequest, TaskResult};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::BridgeError;
use crate::ports::HostPorts;
use crate::registry::TaskRegistry;

/// Counts of what a dispatcher handled before its core went away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Requests answered.
    pub dispatched: u64,
    /// Requests answered with an error outcome.
    pub failed: u64,
}

/// Executes task requests for one core runtime.
pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over a fixed registry.
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Serve the core until it closes its `send` port.
    ///
    /// Returns after every in-flight request has been answered. A protocol
    /// error returns immediately and drops the in-flight requests.
    pub async fn wire(self, ports: HostPorts) -> Result<DispatchSummary, BridgeError> {
        let HostPorts {
            send: mut requests,
            receive: results,
        } = ports;

        info!("Dispatcher wired, waiting for task requests");
        let mut in_flight: JoinSet<(RequestId, bool)> = JoinSet::new();
        let mut outstanding: HashSet<RequestId> = HashSet::new();
        let mut summary = DispatchSummary::default();

        loop {
            tokio::select! {
                envelope = requests.recv() => {
                    let Some(envelope) = envelope else {
                        debug!("Core closed the send port");
                        break;
                    };
                    let (id, task) = self.admit(envelope, &outstanding)?;
                    outstanding.insert(id.clone());
                    let registry = Arc::clone(&self.registry);
                    let results = results.clone();
                    in_flight.spawn(execute(registry, id, task, results));
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    settle(joined, &mut outstanding, &mut summary)?;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            settle(joined, &mut outstanding, &mut summary)?;
        }

        info!(
            dispatched = summary.dispatched,
            failed = summary.failed,
            "Dispatcher finished"
        );
        Ok(summary)
    }

    /// Validate an envelope before anything is executed for it.
    fn admit(
        &self,
        envelope: Value,
        outstanding: &HashSet<RequestId>,
    ) -> Result<(RequestId, HostTask), BridgeError> {
        let id_hint = envelope
            .get("id")
            .and_then(Value::as_str)
            .map(RequestId::from);

        let request: TaskRequest = serde_json::from_value(envelope).map_err(|e| {
            protocol_error(id_hint, format!("malformed task envelope: {}", e))
        })?;

        if outstanding.contains(&request.id) {
            return Err(protocol_error(
                Some(request.id),
                "request id is already outstanding".to_string(),
            ));
        }

        let task = match request.decode() {
            Ok(task) => task,
            Err(e) => return Err(protocol_error(Some(request.id), e.to_string())),
        };

        if !self.registry.is_registered(task.name()) {
            return Err(protocol_error(
                Some(request.id),
                format!("task '{}' is not registered for this command", task.name()),
            ));
        }

        info!(request_id = %request.id, task = %task.name(), "Dispatching task");
        Ok((request.id, task))
    }
}

fn protocol_error(id: Option<RequestId>, reason: String) -> BridgeError {
    error!(request_id = ?id.as_ref().map(RequestId::as_str), reason = %reason, "Protocol error, aborting bridge");
    BridgeError::Protocol { id, reason }
}

/// Run one host task and answer the core. Returns whether it succeeded.
async fn execute(
    registry: Arc<TaskRegistry>,
    id: RequestId,
    task: HostTask,
    results: mpsc::UnboundedSender<TaskResult>,
) -> (RequestId, bool) {
    let name = task.name();

    // A panicking host function still owes the core a result.
    let outcome = match tokio::spawn(async move { registry.execute(task).await }).await {
        Ok(Ok(value)) => TaskOutcome::Ok { value },
        Ok(Err(e)) => {
            warn!(request_id = %id, task = %name, error = %e, "Task failed");
            TaskOutcome::Err {
                error: e.into_failure(),
            }
        }
        Err(e) => {
            error!(request_id = %id, task = %name, error = %e, "Task panicked");
            TaskOutcome::Err {
                error: TaskFailure::internal(e.to_string()),
            }
        }
    };

    let ok = outcome.is_ok();
    debug!(request_id = %id, task = %name, ok, "Sending task result");
    if results
        .send(TaskResult {
            id: id.clone(),
            outcome,
        })
        .is_err()
    {
        warn!(request_id = %id, "Core dropped the receive port");
    }
    (id, ok)
}

fn settle(
    joined: Result<(RequestId, bool), tokio::task::JoinError>,
    outstanding: &mut HashSet<RequestId>,
    summary: &mut DispatchSummary,
) -> Result<(), BridgeError> {
    let (id, ok) = joined.map_err(|e| BridgeError::Core(format!("dispatch task lost: {}", e)))?;
    outstanding.remove(&id);
    summary.dispatched += 1;
    if !ok {
        summary.failed += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use mlbridge_core::{ErrorKind, ReadDocuments, ReadModel, SaveModel, SaveReport, TaskName};
    use serde_json::json;

    use crate::error::TaskError;
    use crate::ports;
    use crate::registry::HostTasks;

    /// In-memory host that tracks how many reads overlap.
    #[derive(Default)]
    struct MemoryHost {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl HostTasks for MemoryHost {
        async fn read_documents(&self, input: ReadDocuments) -> Result<Vec<String>, TaskError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if input.path.to_string_lossy() == "missing" {
                return Err(TaskError::io("read", input.path)(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "not found",
                )));
            }
            let lines = vec!["a".to_string(), "b".to_string(), "c".to_string()];
            Ok(lines.into_iter().take(input.limit.unwrap_or(usize::MAX)).collect())
        }

        async fn read_model(&self, _input: ReadModel) -> Result<String, TaskError> {
            panic!("model store unavailable");
        }

        async fn save_model(&self, _input: SaveModel) -> Result<PathBuf, TaskError> {
            Ok(PathBuf::from("models/m.json"))
        }

        async fn save_report(&self, _input: SaveReport) -> Result<PathBuf, TaskError> {
            Ok(PathBuf::from("reports/r.txt"))
        }
    }

    fn all_tasks(host: Arc<MemoryHost>) -> TaskRegistry {
        TaskName::ALL
            .into_iter()
            .fold(TaskRegistry::new(host), TaskRegistry::register)
    }

    fn envelope(id: &str, name: &str, input: Value) -> Value {
        json!({ "id": id, "name": name, "input": input })
    }

    #[tokio::test]
    async fn test_every_registered_task_answers_ok() {
        let (mut core, host_ports) = ports::channel();
        let server = tokio::spawn(Dispatcher::new(all_tasks(Arc::default())).wire(host_ports));

        let naming = json!({ "source": "train.csv" });
        core.send
            .send(envelope("1", "cli:readDocuments", json!({ "path": "d.csv" })))
            .unwrap();
        core.send
            .send(envelope(
                "2",
                "cli:saveModel",
                json!({ "naming": naming, "artifact": { "w": [1] } }),
            ))
            .unwrap();
        core.send
            .send(envelope(
                "3",
                "cli:saveReport",
                json!({ "naming": naming, "text": "ok" }),
            ))
            .unwrap();
        drop(core.send);

        let mut ids = Vec::new();
        while let Some(result) = core.receive.recv().await {
            assert!(result.outcome.is_ok(), "{:?}", result);
            ids.push(result.id.into_inner());
        }
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let summary = server.await.unwrap().unwrap();
        assert_eq!(summary.dispatched, 3);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_unknown_task_is_fatal_and_keeps_id() {
        let (core, host_ports) = ports::channel();
        let server = tokio::spawn(Dispatcher::new(all_tasks(Arc::default())).wire(host_ports));

        core.send
            .send(envelope("7", "cli:readFile", json!({ "path": "d.csv" })))
            .unwrap();

        let err = server.await.unwrap().unwrap_err();
        match err {
            BridgeError::Protocol { id, reason } => {
                assert_eq!(id, Some(RequestId::new("7")));
                assert!(reason.contains("cli:readFile"));
            }
            other => panic!("Expected Protocol, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unregistered_task_is_fatal() {
        let host = Arc::new(MemoryHost::default());
        let (core, host_ports) = ports::channel();
        let server = tokio::spawn(Dispatcher::new(TaskRegistry::train(host)).wire(host_ports));

        core.send
            .send(envelope("9", "cli:readModel", json!({ "path": "m.json" })))
            .unwrap();

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Protocol { id: Some(id), .. } if id.as_str() == "9"
        ));
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_fatal() {
        let (core, host_ports) = ports::channel();
        let server = tokio::spawn(Dispatcher::new(all_tasks(Arc::default())).wire(host_ports));

        core.send.send(json!({ "name": "cli:readDocuments" })).unwrap();

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Protocol { id: None, .. }));
    }

    #[tokio::test]
    async fn test_io_failure_is_reported_as_data() {
        let (mut core, host_ports) = ports::channel();
        let server = tokio::spawn(Dispatcher::new(all_tasks(Arc::default())).wire(host_ports));

        core.send
            .send(envelope("4", "cli:readDocuments", json!({ "path": "missing" })))
            .unwrap();
        drop(core.send);

        let result = core.receive.recv().await.unwrap();
        assert_eq!(result.id.as_str(), "4");
        match result.outcome {
            TaskOutcome::Err { error } => assert_eq!(error.kind, ErrorKind::IoError),
            other => panic!("Expected Err outcome, got {:?}", other),
        }

        let summary = server.await.unwrap().unwrap();
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_task_still_answers() {
        let (mut core, host_ports) = ports::channel();
        let server = tokio::spawn(Dispatcher::new(all_tasks(Arc::default())).wire(host_ports));

        core.send
            .send(envelope("5", "cli:readModel", json!({ "path": "m.json" })))
            .unwrap();
        drop(core.send);

        let result = core.receive.recv().await.unwrap();
        assert_eq!(result.id.as_str(), "5");
        assert!(matches!(
            result.outcome,
            TaskOutcome::Err { ref error } if error.kind == ErrorKind::Internal
        ));
        assert!(server.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_requests_run_concurrently() {
        let host = Arc::new(MemoryHost::default());
        let (mut core, host_ports) = ports::channel();
        let server = tokio::spawn(Dispatcher::new(all_tasks(host.clone())).wire(host_ports));

        for i in 0..4 {
            core.send
                .send(envelope(
                    &i.to_string(),
                    "cli:readDocuments",
                    json!({ "path": "d.csv", "limit": 2 }),
                ))
                .unwrap();
        }
        drop(core.send);

        let mut answered = 0;
        while let Some(result) = core.receive.recv().await {
            assert_eq!(result.outcome.into_result().unwrap(), json!(["a", "b"]));
            answered += 1;
        }
        assert_eq!(answered, 4);
        assert!(host.peak.load(Ordering::SeqCst) > 1);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_outstanding_id_is_fatal() {
        let (core, host_ports) = ports::channel();
        let server = tokio::spawn(Dispatcher::new(all_tasks(Arc::default())).wire(host_ports));

        let request = envelope("dup", "cli:readDocuments", json!({ "path": "d.csv" }));
        core.send.send(request.clone()).unwrap();
        core.send.send(request).unwrap();

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Protocol { id: Some(id), .. } if id.as_str() == "dup"
        ));
    }
}
