//! # Demo Subsystems
//!
//! Two small subsystems that exercise routing end to end:
//!
//! - [`Pinger`] answers `ping` and keeps a heartbeat while running.
//! - [`Relay`] answers `ping` and forwards `call_pinger` to the pinger over
//!   the bus.

mod pinger;
mod relay;

pub use pinger::Pinger;
pub use relay::Relay;

use crate::lifecycle::LifecycleEvent;
use overseer_bus::{EventBus, Payload};
use tracing::debug;

/// Registry name of [`Pinger`].
pub const PINGER: &str = "pinger";

/// Registry name of [`Relay`].
pub const RELAY: &str = "relay";

/// Publish a lifecycle event for `name`.
pub(crate) async fn announce(bus: &EventBus, name: &str, event: LifecycleEvent) {
    let topic = event.topic(name);
    debug!(topic = %topic, "Announcing lifecycle event");
    bus.publish(&topic, Payload::Empty).await;
}
