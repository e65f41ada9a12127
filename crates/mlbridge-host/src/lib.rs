//! Effect bridge for mlbridge
//!
//! The core runtime is deterministic and performs no I/O. It asks the host
//! for side effects by sending task requests through its ports; this crate
//! answers them and can host a second runtime in a background worker.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mlbridge_host::{run_bridge, FsHost, HostConfig, ProgressSink, TaskRegistry, TrainFlags, TrainProgram};
//!
//! async fn train() -> Result<(), Box<dyn std::error::Error>> {
//!     let flags = TrainFlags {
//!         data_path: ".data/mnist_train.csv".into(),
//!         data_limit: Some(1000),
//!         learning_rate: 0.01,
//!         activation_function: "tanh".to_string(),
//!         seed: 42,
//!         neurons: vec![100],
//!     };
//!
//!     let host = Arc::new(FsHost::new(HostConfig::default()));
//!     let output = run_bridge(
//!         Box::new(TrainProgram::new(flags)),
//!         TaskRegistry::train(host),
//!         ProgressSink::disabled(),
//!     )
//!     .await?;
//!
//!     println!("Model saved to {}", output["modelPath"]);
//!     Ok(())
//! }
//! ```

mod dispatcher;
mod error;
mod host;
mod ports;
mod program;
mod registry;
mod relay;
mod runtime;
mod service_worker;

// Re-export main types
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::{BridgeError, TaskError};
pub use host::{FsHost, HostConfig};
pub use ports::{channel, CoreClient, CorePorts, HostPorts, ProgressSink};
pub use program::{TestFlags, TestProgram, TrainFlags, TrainProgram};
pub use registry::{HostTasks, TaskRegistry};
pub use relay::{ProgramWorker, WorkerCommand, WorkerHandle, WorkerPorts, WorkerRelay, WorkerRuntime};
pub use runtime::{run_bridge, CoreRuntime};
pub use service_worker::{
    CacheStub, LifecycleEvent, ServiceReply, ServiceWorker, CACHE_NAME, LIVENESS_ACK,
};
