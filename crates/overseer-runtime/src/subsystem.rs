//! # Subsystem Trait
//!
//! Defines the contract every subsystem implements to be wrapped by a
//! [`Lifecycle`](crate::lifecycle::Lifecycle) and reached through the
//! overseer.
//!
//! ## Example Implementation
//!
//! ```rust,ignore
//! use overseer_runtime::{Subsystem, SubsystemError};
//! use overseer_bus::MethodError;
//! use async_trait::async_trait;
//! use serde_json::Value;
//!
//! pub struct MySubsystem;
//!
//! #[async_trait]
//! impl Subsystem for MySubsystem {
//!     fn name(&self) -> &str { "my-subsystem" }
//!     async fn on_start(&self) -> Result<(), SubsystemError> { Ok(()) }
//!     async fn on_stop(&self) -> Result<(), SubsystemError> { Ok(()) }
//!     async fn call(
//!         &self,
//!         method: &str,
//!         _args: Vec<Value>,
//!     ) -> Result<Option<Value>, MethodError> {
//!         Err(MethodError::MethodNotFound(method.to_string()))
//!     }
//! }
//! ```

use crate::lifecycle::LifecycleHandle;
use async_trait::async_trait;
use overseer_bus::MethodError;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Error type for lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{subsystem}] {kind}: {message}")]
pub struct SubsystemError {
    /// The subsystem that encountered the error.
    pub subsystem: String,
    /// Error kind.
    pub kind: SubsystemErrorKind,
    /// Human-readable error message.
    pub message: String,
}

impl SubsystemError {
    pub fn new(
        subsystem: impl Into<String>,
        kind: SubsystemErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            subsystem: subsystem.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Categories of subsystem errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemErrorKind {
    /// `on_start` failed.
    StartFailed,
    /// `on_stop` failed.
    ShutdownFailed,
    /// Anything else raised while running.
    RuntimeError,
}

impl fmt::Display for SubsystemErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartFailed => write!(f, "StartFailed"),
            Self::ShutdownFailed => write!(f, "ShutdownFailed"),
            Self::RuntimeError => write!(f, "RuntimeError"),
        }
    }
}

/// The trait every subsystem implements.
///
/// Start and stop hooks are called at most once each by the wrapping
/// [`Lifecycle`](crate::lifecycle::Lifecycle). `call` is a dispatch table over
/// method names: an unknown method must return
/// [`MethodError::MethodNotFound`], never panic.
#[async_trait]
pub trait Subsystem: Send + Sync {
    /// Stable identity, used as registry key and lifecycle-topic prefix.
    fn name(&self) -> &str;

    /// Start background work. Failure aborts the start transition.
    async fn on_start(&self) -> Result<(), SubsystemError>;

    /// Release resources. Failure is logged and never blocks the stop
    /// transition.
    async fn on_stop(&self) -> Result<(), SubsystemError>;

    /// Invoke `method` with positional `args`.
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>, MethodError>;

    /// Receive a handle to the wrapping lifecycle, for `wait()` and
    /// termination checks. Called once, before the subsystem is wrapped.
    fn bind(&mut self, _handle: LifecycleHandle) {}
}
