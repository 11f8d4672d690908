//! # Overseer
//!
//! Owns the registry of lifecycle-wrapped subsystems and the router that
//! serves method calls between them.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Overseer                        │
//! │                                                      │
//! │  registry: name → Lifecycle      router on "method"  │
//! │  ┌─────────┐  ┌─────────┐         ┌──────────────┐   │
//! │  │ pinger  │  │  relay  │ ◄────── │ resolve+call │   │
//! │  └─────────┘  └─────────┘         └──────┬───────┘   │
//! └──────────────────────────────────────────┼───────────┘
//!                                            │ response on correlation ID
//!                                            ▼
//!                                      ┌───────────┐
//!                                      │ Event Bus │
//!                                      └───────────┘
//! ```

mod router;

use crate::config::RetryPolicy;
use crate::lifecycle::Lifecycle;
use crate::rpc;
use crate::subsystem::SubsystemError;
use overseer_bus::{
    EventBus, HandlerId, MethodRequest, MethodResponse, MiddlewareId, Payload, METHOD_TOPIC,
};
use parking_lot::RwLock;
use router::Router;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub(crate) type Registry = Arc<RwLock<HashMap<String, Arc<Lifecycle>>>>;

/// Central coordinator.
///
/// Dropping the overseer removes its router from the bus.
pub struct Overseer {
    bus: EventBus,
    registry: Registry,
    routing: HandlerId,
}

impl Overseer {
    /// Register `subsystems` and start serving method calls on `bus`.
    pub fn new<I>(bus: EventBus, retry: RetryPolicy, subsystems: I) -> Self
    where
        I: IntoIterator<Item = Lifecycle>,
    {
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        let routing = Router::new(bus.clone(), Arc::clone(&registry), retry).install();

        let overseer = Self {
            bus,
            registry,
            routing,
        };
        for lifecycle in subsystems {
            overseer.register(lifecycle);
        }
        overseer
    }

    /// Add a subsystem. Safe while calls are being routed.
    ///
    /// Returns the subsystem previously registered under the same name.
    pub fn register(&self, lifecycle: Lifecycle) -> Option<Arc<Lifecycle>> {
        let name = lifecycle.name().to_string();
        let previous = self
            .registry
            .write()
            .insert(name.clone(), Arc::new(lifecycle));

        if previous.is_some() {
            warn!(subsystem = %name, "Replaced registered subsystem");
        } else {
            info!(subsystem = %name, "Registered subsystem");
        }
        previous
    }

    #[must_use]
    pub fn subsystem(&self, name: &str) -> Option<Arc<Lifecycle>> {
        self.registry.read().get(name).cloned()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn subsystem_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn snapshot(&self) -> Vec<Arc<Lifecycle>> {
        let mut all: Vec<Arc<Lifecycle>> = self.registry.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Start every registered subsystem, in name order.
    ///
    /// # Errors
    ///
    /// Every start hook failure. The remaining subsystems are still started.
    pub async fn start_all(&self) -> Result<(), Vec<SubsystemError>> {
        let mut errors = Vec::new();

        for lifecycle in self.snapshot() {
            if let Err(e) = lifecycle.start().await {
                error!(subsystem = %lifecycle.name(), error = %e, "Failed to start subsystem");
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Stop every registered subsystem. Returns how many this call stopped.
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for lifecycle in self.snapshot() {
            if lifecycle.stop().await {
                stopped += 1;
            }
        }
        info!(stopped, "All subsystems stopped");
        stopped
    }

    /// Invoke `method` on `subsystem` on behalf of `caller`.
    pub async fn call(
        &self,
        caller: &str,
        subsystem: &str,
        method: &str,
        args: Vec<Value>,
    ) -> MethodResponse {
        rpc::subsystem_method(&self.bus, caller, subsystem, method, args).await
    }

    /// Append a raw bus middleware stage.
    pub fn add_middleware<F>(&self, transform: F) -> MiddlewareId
    where
        F: Fn(&str, Payload) -> Option<Payload> + Send + Sync + 'static,
    {
        self.bus.add_middleware(transform)
    }

    pub fn remove_middleware(&self, id: MiddlewareId) -> bool {
        self.bus.remove_middleware(id)
    }

    /// Rewrite every method request before it is delivered.
    pub fn add_request_middleware<F>(&self, transform: F) -> MiddlewareId
    where
        F: Fn(MethodRequest) -> MethodRequest + Send + Sync + 'static,
    {
        self.bus.add_middleware(move |_, payload| match payload {
            Payload::Request(request) => Some(Payload::Request(transform(request))),
            other => Some(other),
        })
    }

    /// Rewrite every method response before it is delivered.
    pub fn add_response_middleware<F>(&self, transform: F) -> MiddlewareId
    where
        F: Fn(MethodResponse) -> MethodResponse + Send + Sync + 'static,
    {
        self.bus.add_middleware(move |_, payload| match payload {
            Payload::Response(response) => Some(Payload::Response(transform(response))),
            other => Some(other),
        })
    }
}

impl Drop for Overseer {
    fn drop(&mut self) {
        // Fails only if someone already cleared the method topic.
        let _ = self.bus.unsubscribe(METHOD_TOPIC, self.routing);
    }
}

impl std::fmt::Debug for Overseer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overseer")
            .field("subsystems", &self.subsystem_names())
            .field("routing", &self.routing)
            .finish()
    }
}
