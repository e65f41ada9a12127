//! Service-worker flavour of the worker relay.
//!
//! Adds an install lifecycle that activates immediately, a named cache that
//! is never populated, and a static liveness reply for anything that is not
//! a worker protocol message.

use mlbridge_core::{ServiceWorkerState, WorkerMessage};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::BridgeError;
use crate::relay::{WorkerHandle, WorkerRelay, WorkerRuntime};

/// Name of the service worker's cache.
pub const CACHE_NAME: &str = "machine-learning-cache-v1";

/// Reply to any message outside the worker protocol.
pub const LIVENESS_ACK: &str = "Hi client";

/// A cache that exists by name only: nothing is precached and every lookup
/// misses, so there is no offline mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStub {
    name: String,
}

impl CacheStub {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resources fetched at install time. Always empty.
    pub fn precache_list(&self) -> &[String] {
        &[]
    }

    pub fn lookup(&self, key: &str) -> Option<Value> {
        trace!(cache = %self.name, key, "Cache miss");
        None
    }
}

/// Lifecycle events delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Install,
    Activate,
}

/// How a message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceReply {
    /// Not a protocol message; answered with a static acknowledgement.
    Ack(String),
    /// Handed to the worker relay; replies arrive on the relay's outbox.
    Relayed,
    /// Protocol message received before activation; dropped.
    NotActive,
}

type RuntimeFactory = Box<dyn Fn() -> Box<dyn WorkerRuntime> + Send>;

/// A worker relay behind a service-worker lifecycle.
pub struct ServiceWorker {
    state: ServiceWorkerState,
    cache: CacheStub,
    factory: RuntimeFactory,
    relay: Option<WorkerHandle>,
}

impl ServiceWorker {
    /// Create a service worker that hosts runtimes built by `factory`.
    pub fn new(factory: impl Fn() -> Box<dyn WorkerRuntime> + Send + 'static) -> Self {
        Self {
            state: ServiceWorkerState::default(),
            cache: CacheStub::new(CACHE_NAME),
            factory: Box::new(factory),
            relay: None,
        }
    }

    pub fn state(&self) -> ServiceWorkerState {
        self.state
    }

    pub fn cache(&self) -> &CacheStub {
        &self.cache
    }

    /// Handle a lifecycle event.
    pub fn handle_lifecycle(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Install => {
                info!(
                    cache = %self.cache.name(),
                    precached = self.cache.precache_list().len(),
                    "Service worker installed"
                );
                self.state = ServiceWorkerState::Waiting;
                self.skip_waiting();
            }
            LifecycleEvent::Activate => {
                if self.state == ServiceWorkerState::Waiting {
                    self.state = ServiceWorkerState::Active;
                    info!("Service worker activated");
                }
            }
        }
    }

    /// Take control without waiting for existing clients to go away.
    pub fn skip_waiting(&mut self) {
        if self.state != ServiceWorkerState::Active {
            self.state = ServiceWorkerState::Active;
            info!("Service worker skipped waiting and is active");
        }
    }

    /// Handle a message posted by a client.
    pub fn handle_message(&mut self, data: Value) -> Result<ServiceReply, BridgeError> {
        let message = match serde_json::from_value::<WorkerMessage>(data) {
            Ok(message) => message,
            Err(_) => {
                debug!("Non-protocol message, sending liveness ack");
                return Ok(ServiceReply::Ack(LIVENESS_ACK.to_string()));
            }
        };

        if self.state != ServiceWorkerState::Active {
            warn!(state = ?self.state, kind = message.kind(), "Dropping message before activation");
            return Ok(ServiceReply::NotActive);
        }

        self.post(message)?;
        Ok(ServiceReply::Relayed)
    }

    /// The current relay, if one has been started.
    pub fn relay_mut(&mut self) -> Option<&mut WorkerHandle> {
        self.relay.as_mut()
    }

    fn post(&mut self, message: WorkerMessage) -> Result<(), BridgeError> {
        if let Some(relay) = &self.relay {
            match relay.post_message(message.clone()) {
                Ok(()) => return Ok(()),
                Err(BridgeError::ChannelClosed) => {
                    debug!("Previous relay has finished, starting a new one");
                }
                Err(e) => return Err(e),
            }
        }

        let relay = WorkerRelay::spawn((self.factory)())?;
        relay.post_message(message)?;
        self.relay = Some(relay);
        Ok(())
    }
}
