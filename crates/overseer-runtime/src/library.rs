//! # Subsystem Library
//!
//! Typed front-ends for the methods each demo subsystem exposes. Every call
//! goes through the bus with the owning subsystem's name as caller.

use crate::rpc;
use crate::subsystems::{PINGER, RELAY};
use overseer_bus::{EventBus, MethodError};
use serde_json::Value;

/// Method groups bound to a calling subsystem.
#[derive(Debug, Clone)]
pub struct SubsystemLibrary {
    bus: EventBus,
    owner: String,
}

impl SubsystemLibrary {
    pub fn new(bus: EventBus, owner: impl Into<String>) -> Self {
        Self {
            bus,
            owner: owner.into(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn pinger(&self) -> PingerMethods<'_> {
        PingerMethods { library: self }
    }

    #[must_use]
    pub fn relay(&self) -> RelayMethods<'_> {
        RelayMethods { library: self }
    }

    async fn call(
        &self,
        subsystem: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, MethodError> {
        rpc::subsystem_method(&self.bus, &self.owner, subsystem, method, args)
            .await
            .into_result()
    }
}

/// Methods of the `pinger` subsystem.
#[derive(Debug, Clone, Copy)]
pub struct PingerMethods<'a> {
    library: &'a SubsystemLibrary,
}

impl PingerMethods<'_> {
    pub async fn ping(&self, message: &str) -> Result<Option<Value>, MethodError> {
        self.library
            .call(PINGER, "ping", vec![Value::from(message)])
            .await
    }
}

/// Methods of the `relay` subsystem.
#[derive(Debug, Clone, Copy)]
pub struct RelayMethods<'a> {
    library: &'a SubsystemLibrary,
}

impl RelayMethods<'_> {
    pub async fn ping(&self, message: &str) -> Result<Option<Value>, MethodError> {
        self.library
            .call(RELAY, "ping", vec![Value::from(message)])
            .await
    }

    /// Ask the relay to ping the pinger on our behalf.
    pub async fn call_pinger(&self, message: &str) -> Result<Option<Value>, MethodError> {
        self.library
            .call(RELAY, "call_pinger", vec![Value::from(message)])
            .await
    }

    pub async fn process_active_leaves_update(&self) -> Result<Option<Value>, MethodError> {
        self.library
            .call(RELAY, "process_active_leaves_update", Vec::new())
            .await
    }
}
