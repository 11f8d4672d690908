//! # Event Bus
//!
//! Topic-keyed publish/subscribe engine.
//!
//! ## Dispatch Rules
//!
//! - Synchronous handlers run inline, in registration order, and finish
//!   before `publish` returns.
//! - Asynchronous handlers get one spawned task per delivery. They are
//!   launched in registration order and complete in any order.
//! - A transactional handler never runs concurrently with itself. Waiting for
//!   its previous invocation happens inside `publish`, with the bus-wide
//!   dispatch lock released for the duration of the wait.
//! - Once handlers leave the registry the moment they are selected for
//!   dispatch, before they run.

use crate::events::Payload;
use crate::middleware::{self, MiddlewareFn, MiddlewareId, Stage};
use crate::subscriber::{boxed_async, BusError, Callback, Handler, HandlerId, SyncCallback};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, trace};

type HandlerMap = HashMap<String, Vec<Arc<Handler>>>;

/// In-memory event bus.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

struct Shared {
    /// Live handlers per topic, in registration order. Topics with no
    /// handlers are removed from the map.
    handlers: Mutex<HandlerMap>,

    /// Middleware stages shared by every topic.
    middleware: RwLock<Vec<Stage>>,

    /// Serializes `publish` calls.
    dispatch: AsyncMutex<()>,

    /// Async deliveries spawned and not yet finished.
    outstanding: watch::Sender<usize>,

    /// Source of handler and middleware tokens.
    next_id: AtomicU64,

    /// Total `publish` calls.
    events_published: AtomicU64,
}

/// Decrements the outstanding counter when the delivery task ends, even if
/// the callback panics.
struct Outstanding {
    shared: Arc<Shared>,
}

impl Outstanding {
    fn begin(shared: &Arc<Shared>) -> Self {
        shared.outstanding.send_modify(|n| *n += 1);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.shared
            .outstanding
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn snapshot(&self, topic: &str) -> Option<Vec<Arc<Handler>>> {
        let handlers = self.handlers.lock();
        handlers
            .get(topic)
            .filter(|list| !list.is_empty())
            .cloned()
    }

    fn remove_handler(&self, topic: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(topic) else {
            return false;
        };

        let removed = match list.iter().position(|h| h.id == id) {
            Some(idx) => {
                list.remove(idx);
                true
            }
            None => false,
        };
        if list.is_empty() {
            handlers.remove(topic);
        }
        removed
    }

    fn apply_middleware(&self, topic: &str, payload: Payload) -> Option<Payload> {
        // Stages may register further middleware, so never run them under the lock.
        let stages = self.middleware.read().clone();
        let out = middleware::run(&stages, topic, payload);
        if out.is_none() {
            trace!(topic = %topic, "Delivery suppressed by middleware");
        }
        out
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                handlers: Mutex::new(HashMap::new()),
                middleware: RwLock::new(Vec::new()),
                dispatch: AsyncMutex::new(()),
                outstanding,
                next_id: AtomicU64::new(1),
                events_published: AtomicU64::new(0),
            }),
        }
    }

    fn register(
        &self,
        topic: &str,
        callback: Callback,
        once: bool,
        transactional: bool,
    ) -> HandlerId {
        let id = HandlerId(self.shared.next_id());
        let handler = Arc::new(Handler::new(id, callback, once, transactional));
        debug!(topic = %topic, handler = ?handler, "New subscription created");

        self.shared
            .handlers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        id
    }

    /// Subscribe a synchronous, persistent handler.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> HandlerId
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let callback: SyncCallback = Arc::new(callback);
        self.register(topic, Callback::Sync(callback), false, false)
    }

    /// Subscribe an asynchronous, persistent handler.
    ///
    /// With `transactional` set, successive invocations of this handler are
    /// run one at a time.
    pub fn subscribe_async<F, Fut>(
        &self,
        topic: &str,
        callback: F,
        transactional: bool,
    ) -> HandlerId
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(topic, Callback::Async(boxed_async(callback)), false, transactional)
    }

    /// Subscribe a synchronous handler that fires at most once.
    pub fn subscribe_once<F>(&self, topic: &str, callback: F) -> HandlerId
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let callback: SyncCallback = Arc::new(callback);
        self.register(topic, Callback::Sync(callback), true, false)
    }

    /// Subscribe an asynchronous handler that fires at most once.
    pub fn subscribe_once_async<F, Fut>(&self, topic: &str, callback: F) -> HandlerId
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(topic, Callback::Async(boxed_async(callback)), true, false)
    }

    /// Remove the handler registered under `id`.
    ///
    /// # Errors
    ///
    /// `BusError::TopicNotFound` if `topic` has no live handlers. An unknown
    /// `id` on a live topic is not an error.
    pub fn unsubscribe(&self, topic: &str, id: HandlerId) -> Result<(), BusError> {
        if !self.has_callback(topic) {
            return Err(BusError::TopicNotFound(topic.to_string()));
        }
        if self.shared.remove_handler(topic, id) {
            debug!(topic = %topic, handler = %id, "Subscription removed");
        }
        Ok(())
    }

    /// Remove every handler under `topic`.
    ///
    /// # Errors
    ///
    /// `BusError::TopicNotFound` if `topic` has no live handlers.
    pub fn unsubscribe_all(&self, topic: &str) -> Result<(), BusError> {
        let removed = self.shared.handlers.lock().remove(topic);
        match removed {
            Some(list) if !list.is_empty() => {
                debug!(topic = %topic, count = list.len(), "All subscriptions removed");
                Ok(())
            }
            _ => Err(BusError::TopicNotFound(topic.to_string())),
        }
    }

    /// Whether `topic` has at least one live handler.
    #[must_use]
    pub fn has_callback(&self, topic: &str) -> bool {
        self.handler_count(topic) > 0
    }

    /// Number of live handlers on `topic`.
    #[must_use]
    pub fn handler_count(&self, topic: &str) -> usize {
        self.shared.handlers.lock().get(topic).map_or(0, Vec::len)
    }

    /// Append a middleware stage.
    pub fn add_middleware<F>(&self, transform: F) -> MiddlewareId
    where
        F: Fn(&str, Payload) -> Option<Payload> + Send + Sync + 'static,
    {
        let transform: MiddlewareFn = Arc::new(transform);
        let id = MiddlewareId(self.shared.next_id());
        self.shared.middleware.write().push(Stage { id, transform });
        debug!(middleware = %id, "Middleware added");
        id
    }

    /// Remove a middleware stage. Returns `false` if `id` is not registered.
    pub fn remove_middleware(&self, id: MiddlewareId) -> bool {
        let mut stages = self.shared.middleware.write();
        match stages.iter().position(|s| s.id == id) {
            Some(idx) => {
                stages.remove(idx);
                debug!(middleware = %id, "Middleware removed");
                true
            }
            None => false,
        }
    }

    /// Deliver `payload` to every handler on `topic`.
    pub async fn publish(&self, topic: &str, payload: Payload) {
        let shared = &self.shared;
        shared.events_published.fetch_add(1, Ordering::Relaxed);

        let mut dispatch = shared.dispatch.lock().await;

        // Handlers may (un)subscribe while we iterate, so work on a copy.
        let Some(snapshot) = shared.snapshot(topic) else {
            trace!(topic = %topic, kind = payload.kind(), "Event dropped (no handlers)");
            return;
        };
        debug!(
            topic = %topic,
            kind = payload.kind(),
            handlers = snapshot.len(),
            "Event published"
        );

        for handler in snapshot {
            // Removal is the claim: a concurrent publish may hold the same
            // once handler in its snapshot.
            if handler.once && !shared.remove_handler(topic, handler.id) {
                continue;
            }

            match &handler.callback {
                Callback::Sync(callback) => {
                    if let Some(delivered) = shared.apply_middleware(topic, payload.clone()) {
                        callback(delivered);
                    }
                }
                Callback::Async(callback) => {
                    let pending = Outstanding::begin(shared);

                    let serial = match &handler.serial {
                        Some(lock) => {
                            // The previous invocation may itself be publishing.
                            drop(dispatch);
                            let guard = Arc::clone(lock).lock_owned().await;
                            dispatch = shared.dispatch.lock().await;
                            Some(guard)
                        }
                        None => None,
                    };

                    let task_shared = Arc::clone(shared);
                    let callback = Arc::clone(callback);
                    let topic = topic.to_string();
                    let payload = payload.clone();
                    tokio::spawn(async move {
                        let _pending = pending;
                        let _serial = serial;
                        if let Some(delivered) = task_shared.apply_middleware(&topic, payload) {
                            callback(delivered).await;
                        }
                    });
                }
            }
        }

        drop(dispatch);
    }

    /// Wait until every async delivery spawned so far has finished.
    ///
    /// Not a barrier: deliveries spawned during the wait are waited for too.
    pub async fn wait_async(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        // The sender lives as long as the bus, so this only fails if it is gone.
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    /// Async deliveries currently in flight.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Total number of `publish` calls.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.shared.events_published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.shared.handlers.lock().len())
            .field("middleware", &self.shared.middleware.read().len())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
