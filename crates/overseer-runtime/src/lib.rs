//! # Overseer Runtime
//!
//! Lifecycle management and method routing for in-process subsystems that
//! talk only through an [`overseer_bus::EventBus`].
//!
//! ## Call Flow
//!
//! ```text
//! caller ── MethodRequest ──► "method" ──► Overseer router
//!   ▲                                          │ resolve (retry) + call
//!   │                                          ▼
//!   └──── MethodResponse ◄── <correlation id> ─┘
//! ```
//!
//! The `main.rs` binary wires the two demo subsystems together.

#![allow(clippy::type_complexity)]
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod library;
pub mod lifecycle;
pub mod overseer;
pub mod rpc;
pub mod subsystem;
pub mod subsystems;

pub use config::{ConfigError, RetryPolicy, RuntimeConfig};
pub use library::SubsystemLibrary;
pub use lifecycle::{Lifecycle, LifecycleEvent, LifecycleHandle, LifecycleStatus};
pub use overseer::Overseer;
pub use rpc::{await_topic, generate_correlation_id, subsystem_method, subsystem_method_timeout};
pub use subsystem::{Subsystem, SubsystemError, SubsystemErrorKind};
