//! # Event Subscriber
//!
//! Defines the subscription side of the event bus: handler callbacks, their
//! modifiers, and the tokens used to remove them again.

use crate::events::Payload;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The topic has no live handlers.
    #[error("topic {0} doesn't exist")]
    TopicNotFound(String),
}

/// Opaque token identifying one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Callback run inline by `publish`.
pub type SyncCallback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Callback run on its own task per delivery.
pub type AsyncCallback = Arc<dyn Fn(Payload) -> BoxFuture<'static, ()> + Send + Sync>;

/// Box an async closure into an [`AsyncCallback`].
pub(crate) fn boxed_async<F, Fut>(callback: F) -> AsyncCallback
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| -> BoxFuture<'static, ()> { Box::pin(callback(payload)) })
}

#[derive(Clone)]
pub(crate) enum Callback {
    Sync(SyncCallback),
    Async(AsyncCallback),
}

/// A registered handler.
///
/// Owned by the bus; `publish` works on `Arc` snapshots so removal during
/// dispatch never invalidates an in-progress iteration.
pub(crate) struct Handler {
    pub(crate) id: HandlerId,
    pub(crate) callback: Callback,
    pub(crate) once: bool,
    /// Present only for transactional async handlers.
    pub(crate) serial: Option<Arc<Mutex<()>>>,
}

impl Handler {
    pub(crate) fn new(id: HandlerId, callback: Callback, once: bool, transactional: bool) -> Self {
        let serial = match (&callback, transactional) {
            (Callback::Async(_), true) => Some(Arc::new(Mutex::new(()))),
            _ => None,
        };
        Self {
            id,
            callback,
            once,
            serial,
        }
    }

    pub(crate) fn is_async(&self) -> bool {
        matches!(self.callback, Callback::Async(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("async", &self.is_async())
            .field("once", &self.once)
            .field("transactional", &self.serial.is_some())
            .finish()
    }
}
