//! Core runtimes and the bridge that hosts them.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::error::BridgeError;
use crate::ports::{self, CorePorts, ProgressSink};
use crate::registry::TaskRegistry;

/// A deterministic computation that performs side effects only by sending
/// task requests through its ports.
///
/// The ports are dropped when `run` returns, which tells the host the core
/// has nothing further to ask.
#[async_trait]
pub trait CoreRuntime: Send + 'static {
    /// Drive the run to completion and return its final output.
    async fn run(self: Box<Self>, ports: CorePorts, progress: ProgressSink)
        -> Result<Value, BridgeError>;
}

/// Run a core against a dispatcher serving `registry`.
///
/// The dispatcher owns the host ends of the channels for the whole run; a
/// protocol error aborts the core.
pub async fn run_bridge(
    core: Box<dyn CoreRuntime>,
    registry: TaskRegistry,
    progress: ProgressSink,
) -> Result<Value, BridgeError> {
    let (core_ports, host_ports) = ports::channel();
    let dispatcher = Dispatcher::new(registry);

    info!("Starting core runtime");
    let core_handle = tokio::spawn(core.run(core_ports, progress));

    match dispatcher.wire(host_ports).await {
        Ok(summary) => {
            let output = core_handle
                .await
                .map_err(|e| BridgeError::Core(format!("core runtime crashed: {}", e)))??;
            info!(
                dispatched = summary.dispatched,
                failed = summary.failed,
                "Core runtime finished"
            );
            Ok(output)
        }
        Err(e) => {
            error!(error = %e, "Bridge aborted");
            core_handle.abort();
            Err(e)
        }
    }
}
