//! # Overseer Bus - Topic Event Bus for Inter-Subsystem Communication
//!
//! Subsystems never hold references to each other. Everything they exchange
//! goes through an [`EventBus`] as a [`Payload`] published on a text topic.
//!
//! ## Dispatch Model
//!
//! ```text
//!   publish(topic, payload)
//!          │
//!          ▼
//!   ┌──────────────┐   snapshot of handlers (registration order)
//!   │  Event Bus   │ ─────────────────────────────────────────┐
//!   └──────────────┘                                          │
//!          │                                                  │
//!          ├── sync handler ──► middleware ──► callback (inline)
//!          │                                                  │
//!          └── async handler ─► spawn ─► middleware ─► callback
//!                               (serialized if transactional)
//! ```
//!
//! ## Method Protocol
//!
//! Requests travel as [`MethodRequest`] on [`METHOD_TOPIC`]; each reply is a
//! single [`MethodResponse`] published on the request's correlation topic.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod middleware;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{MethodError, MethodRequest, MethodResponse, Payload};
pub use middleware::{MiddlewareFn, MiddlewareId};
pub use publisher::EventBus;
pub use subscriber::{AsyncCallback, BusError, HandlerId, SyncCallback};

/// Fixed topic the overseer listens on for method requests.
pub const METHOD_TOPIC: &str = "method";
