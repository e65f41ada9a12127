//! The two directional channels between a core runtime and its host.
//!
//! `send` carries request envelopes from the core to the host and `receive`
//! carries results back. Request envelopes travel as raw JSON so the host
//! can reject a malformed one instead of never seeing it.

use std::collections::HashMap;
use std::sync::Arc;

use mlbridge_core::{HostTask, RequestId, TaskOutcome, TaskResult, WorkerEvent};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::BridgeError;

/// Core-side ends of the bridge.
pub struct CorePorts {
    pub send: mpsc::UnboundedSender<Value>,
    pub receive: mpsc::UnboundedReceiver<TaskResult>,
}

/// Host-side ends of the bridge.
pub struct HostPorts {
    pub send: mpsc::UnboundedReceiver<Value>,
    pub receive: mpsc::UnboundedSender<TaskResult>,
}

/// Create a connected pair of core and host ports.
pub fn channel() -> (CorePorts, HostPorts) {
    let (send_tx, send_rx) = mpsc::unbounded_channel();
    let (receive_tx, receive_rx) = mpsc::unbounded_channel();
    (
        CorePorts {
            send: send_tx,
            receive: receive_rx,
        },
        HostPorts {
            send: send_rx,
            receive: receive_tx,
        },
    )
}

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<TaskOutcome>>>>;

/// Request/response client over [`CorePorts`].
///
/// Generates correlation ids and routes each result to the caller waiting on
/// it, so several requests can be in flight at once.
pub struct CoreClient {
    send: mpsc::UnboundedSender<Value>,
    pending: Pending,
    router: JoinHandle<()>,
}

impl CoreClient {
    /// Take ownership of the core ports and start routing results.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ports: CorePorts) -> Self {
        let CorePorts { send, mut receive } = ports;
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let routes = Arc::clone(&pending);

        let router = tokio::spawn(async move {
            while let Some(result) = receive.recv().await {
                let waiter = routes.lock().await.remove(&result.id);
                match waiter {
                    Some(tx) => {
                        trace!(request_id = %result.id, "Routing task result");
                        tx.send(result.outcome).ok();
                    }
                    None => warn!(request_id = %result.id, "Result for unknown request"),
                }
            }
            debug!("Host closed the receive port");
        });

        Self {
            send,
            pending,
            router,
        }
    }

    /// Send a task and wait for its outcome.
    pub async fn request(&self, task: HostTask) -> Result<TaskOutcome, BridgeError> {
        let id = RequestId::generate();
        let request = task
            .into_request(id.clone())
            .map_err(|e| BridgeError::Core(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        debug!(request_id = %id, task = %request.name, "Sending task request");
        if self.send.send(serde_json::to_value(&request)?).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(BridgeError::ChannelClosed);
        }

        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Send a raw envelope without waiting for a result.
    pub fn send_raw(&self, envelope: Value) -> Result<(), BridgeError> {
        self.send
            .send(envelope)
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

impl Drop for CoreClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

/// Outlet for progress events of a run.
///
/// Disabled when the run has no controlling context to report to.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<WorkerEvent>>,
}

impl ProgressSink {
    /// A sink forwarding to a worker event channel.
    pub fn new(tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that only logs.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Report intermediate run state.
    pub fn progress(&self, payload: Value) {
        debug!(progress = %payload, "Run progress");
        if let Some(tx) = &self.tx {
            if tx.send(WorkerEvent::Progress(payload)).is_err() {
                warn!("Progress receiver dropped");
            }
        }
    }
}
