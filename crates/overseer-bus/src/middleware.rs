//! # Middleware Pipeline
//!
//! An ordered list of payload transforms shared by every topic. The pipeline
//! runs once per handler invocation, immediately before the callback, so a
//! stage sees the payload as it stands at delivery time rather than at
//! publish time.

use crate::events::Payload;
use std::fmt;
use std::sync::Arc;

/// Opaque token identifying one registered middleware stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MiddlewareId(pub(crate) u64);

impl fmt::Display for MiddlewareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "middleware-{}", self.0)
    }
}

/// A stage: `(topic, payload) -> payload`. Returning `None` suppresses the
/// delivery currently being dispatched.
pub type MiddlewareFn = Arc<dyn Fn(&str, Payload) -> Option<Payload> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Stage {
    pub(crate) id: MiddlewareId,
    pub(crate) transform: MiddlewareFn,
}

/// Run `stages` in order over `payload`.
///
/// Stops at the first stage that suppresses the delivery.
pub(crate) fn run(stages: &[Stage], topic: &str, payload: Payload) -> Option<Payload> {
    stages
        .iter()
        .try_fold(payload, |current, stage| (stage.transform)(topic, current))
}
