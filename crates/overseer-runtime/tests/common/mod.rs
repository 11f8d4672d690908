//! Shared fixtures for the routing tests.

#![allow(dead_code)]

use async_trait::async_trait;
use overseer_bus::MethodError;
use overseer_runtime::{RetryPolicy, Subsystem, SubsystemError};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Three quick attempts, no jitter.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::fixed(3, Duration::from_millis(5))
}

/// Test subsystem that counts calls.
///
/// - `echo` returns its first argument
/// - `explode` panics
/// - `slow` sleeps for 50ms, then answers `"done"`
pub struct Probe {
    name: String,
    calls: Arc<AtomicUsize>,
}

impl Probe {
    pub fn new(name: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = Self {
            name: name.to_string(),
            calls: Arc::clone(&calls),
        };
        (probe, calls)
    }
}

#[async_trait]
impl Subsystem for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_start(&self) -> Result<(), SubsystemError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), SubsystemError> {
        Ok(())
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>, MethodError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match method {
            "echo" => Ok(args.into_iter().next()),
            "explode" => panic!("probe exploded"),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Some(Value::from("done")))
            }
            other => Err(MethodError::MethodNotFound(other.to_string())),
        }
    }
}
