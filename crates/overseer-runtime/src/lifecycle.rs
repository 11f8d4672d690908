//! # Subsystem Lifecycle
//!
//! Wraps a [`Subsystem`] and guarantees its start and stop hooks run at most
//! once each.
//!
//! ## State Machine
//!
//! ```text
//!   [NOT STARTED] ──start() ok──→ [STARTED] ──stop()──→ [STOPPED]
//!        │    ↑                                            ↑
//!        │    └── start() failed (may retry)               │
//!        └────────────────────stop()───────────────────────┘
//! ```
//!
//! Start and stop are guarded by independent compare-and-swap flags, so a
//! stop issued before start completes still wins: once stopped, a subsystem
//! can never be started.

use crate::subsystem::{Subsystem, SubsystemError};
use overseer_bus::MethodError;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Events a subsystem announces on `"<name>:<event>"` topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Published when a subsystem has started.
    Start,
    /// Published on errors, and on stop.
    Error,
}

impl LifecycleEvent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Error => "error",
        }
    }

    /// Topic for this event on the subsystem called `name`.
    #[must_use]
    pub fn topic(&self, name: &str) -> String {
        format!("{}:{}", name, self.as_str())
    }
}

/// Coarse lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    NotStarted,
    Started,
    Stopped,
}

struct LifecycleState {
    start_attempted: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    terminated: watch::Sender<bool>,
}

impl LifecycleState {
    fn new() -> Self {
        let (terminated, _) = watch::channel(false);
        Self {
            start_attempted: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            terminated,
        }
    }

    fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        let mut terminated = self.terminated.subscribe();
        // The sender lives as long as the state, so this cannot fail while we hold it.
        let _ = terminated.wait_for(|t| *t).await;
    }
}

/// Handle given to a subsystem so it can observe its own lifecycle.
///
/// Shares only the lifecycle state, never the wrapper or the subsystem, so
/// holding one does not keep the subsystem alive.
#[derive(Clone)]
pub struct LifecycleHandle {
    name: Arc<str>,
    state: Arc<LifecycleState>,
}

impl LifecycleHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        *self.state.terminated.borrow()
    }

    /// Wait until the subsystem is stopped.
    pub async fn wait(&self) {
        self.state.wait().await;
    }

    /// Receiver that flips to `true` on stop, for use in `tokio::select!`
    /// loops.
    #[must_use]
    pub fn termination(&self) -> watch::Receiver<bool> {
        self.state.terminated.subscribe()
    }
}

impl fmt::Debug for LifecycleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHandle")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// A subsystem together with its start/stop guarantees.
pub struct Lifecycle {
    name: String,
    state: Arc<LifecycleState>,
    subsystem: Box<dyn Subsystem>,
}

impl Lifecycle {
    /// Wrap `subsystem`, handing it a [`LifecycleHandle`] first.
    pub fn new<S>(mut subsystem: S) -> Self
    where
        S: Subsystem + 'static,
    {
        let name = subsystem.name().to_string();
        let state = Arc::new(LifecycleState::new());
        subsystem.bind(LifecycleHandle {
            name: Arc::from(name.as_str()),
            state: Arc::clone(&state),
        });

        Self {
            name,
            state,
            subsystem: Box::new(subsystem),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the subsystem.
    ///
    /// Returns `Ok(true)` if this call started it, `Ok(false)` if a start was
    /// already attempted or the subsystem was stopped first.
    ///
    /// # Errors
    ///
    /// The start hook's error. The attempt is then forgotten, so a later
    /// `start` may retry.
    pub async fn start(&self) -> Result<bool, SubsystemError> {
        if self
            .state
            .start_attempted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(subsystem = %self.name, "Not starting subsystem (start already attempted)");
            return Ok(false);
        }

        if self.state.stopped.load(Ordering::Acquire) {
            info!(subsystem = %self.name, "Not starting subsystem (already stopped)");
            return Ok(false);
        }

        info!(subsystem = %self.name, "Starting subsystem");
        if let Err(e) = self.subsystem.on_start().await {
            self.state.start_attempted.store(false, Ordering::Release);
            warn!(subsystem = %self.name, error = %e, "Subsystem failed to start");
            return Err(e);
        }

        self.state.started.store(true, Ordering::Release);
        Ok(true)
    }

    /// Stop the subsystem. Returns `false` if it was already stopped.
    pub async fn stop(&self) -> bool {
        if self
            .state
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(subsystem = %self.name, "Stopping subsystem (ignoring: already stopped)");
            return false;
        }

        info!(subsystem = %self.name, "Stopping subsystem");
        if let Err(e) = self.subsystem.on_stop().await {
            error!(subsystem = %self.name, error = %e, "Could not stop subsystem cleanly");
        }

        self.state.terminated.send_replace(true);
        true
    }

    /// Snapshot of `started && !stopped`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    #[must_use]
    pub fn status(&self) -> LifecycleStatus {
        if self.state.stopped.load(Ordering::Acquire) {
            LifecycleStatus::Stopped
        } else if self.state.started.load(Ordering::Acquire) {
            LifecycleStatus::Started
        } else {
            LifecycleStatus::NotStarted
        }
    }

    /// Wait until the subsystem is stopped. Returns at once if it already is.
    pub async fn wait(&self) {
        self.state.wait().await;
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> LifecycleHandle {
        LifecycleHandle {
            name: Arc::from(self.name.as_str()),
            state: Arc::clone(&self.state),
        }
    }

    /// Invoke a method on the wrapped subsystem.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>, MethodError> {
        self.subsystem.call(method, args).await
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystem::SubsystemErrorKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct Hooks {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: AtomicBool,
        fail_stop: AtomicBool,
    }

    struct Probe {
        hooks: Arc<Hooks>,
        handle: Arc<Mutex<Option<LifecycleHandle>>>,
    }

    impl Probe {
        fn new() -> (Self, Arc<Hooks>) {
            let hooks = Arc::new(Hooks::default());
            let probe = Self {
                hooks: Arc::clone(&hooks),
                handle: Arc::new(Mutex::new(None)),
            };
            (probe, hooks)
        }
    }

    #[async_trait]
    impl Subsystem for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        async fn on_start(&self) -> Result<(), SubsystemError> {
            self.hooks.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.hooks.fail_start.load(Ordering::SeqCst) {
                return Err(SubsystemError::new(
                    "probe",
                    SubsystemErrorKind::StartFailed,
                    "refused",
                ));
            }
            Ok(())
        }

        async fn on_stop(&self) -> Result<(), SubsystemError> {
            self.hooks.stops.fetch_add(1, Ordering::SeqCst);
            if self.hooks.fail_stop.load(Ordering::SeqCst) {
                return Err(SubsystemError::new(
                    "probe",
                    SubsystemErrorKind::ShutdownFailed,
                    "stuck",
                ));
            }
            Ok(())
        }

        async fn call(
            &self,
            method: &str,
            _args: Vec<Value>,
        ) -> Result<Option<Value>, MethodError> {
            Err(MethodError::MethodNotFound(method.to_string()))
        }

        fn bind(&mut self, handle: LifecycleHandle) {
            *self.handle.lock() = Some(handle);
        }
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let (probe, hooks) = Probe::new();
        let lifecycle = Lifecycle::new(probe);
        assert_eq!(lifecycle.status(), LifecycleStatus::NotStarted);
        assert!(!lifecycle.is_running());

        assert_eq!(lifecycle.start().await, Ok(true));
        assert!(lifecycle.is_running());
        assert_eq!(lifecycle.status(), LifecycleStatus::Started);

        assert!(lifecycle.stop().await);
        assert!(!lifecycle.is_running());
        assert_eq!(lifecycle.status(), LifecycleStatus::Stopped);

        assert_eq!(hooks.starts.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_start_runs_hook_once() {
        let (probe, hooks) = Probe::new();
        let lifecycle = Arc::new(Lifecycle::new(probe));

        let (a, b) = tokio::join!(lifecycle.start(), lifecycle.start());
        let mut outcomes = vec![a, b];
        outcomes.sort_by_key(|o| matches!(o, Ok(true)));

        assert_eq!(outcomes, vec![Ok(false), Ok(true)]);
        assert_eq!(hooks.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let (probe, hooks) = Probe::new();
        let lifecycle = Lifecycle::new(probe);

        assert_eq!(lifecycle.start().await, Ok(true));
        assert_eq!(lifecycle.start().await, Ok(false));
        assert_eq!(hooks.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_start_can_be_retried() {
        let (probe, hooks) = Probe::new();
        hooks.fail_start.store(true, Ordering::SeqCst);
        let lifecycle = Lifecycle::new(probe);

        let err = lifecycle.start().await.expect_err("start hook fails");
        assert_eq!(err.kind, SubsystemErrorKind::StartFailed);
        assert!(!lifecycle.is_running());

        hooks.fail_start.store(false, Ordering::SeqCst);
        assert_eq!(lifecycle.start().await, Ok(true));
        assert_eq!(hooks.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_after_failed_start_runs_stop_hook() {
        let (probe, hooks) = Probe::new();
        hooks.fail_start.store(true, Ordering::SeqCst);
        let lifecycle = Lifecycle::new(probe);

        assert!(lifecycle.start().await.is_err());
        assert!(lifecycle.stop().await);
        assert_eq!(hooks.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_after_stop_is_refused() {
        let (probe, hooks) = Probe::new();
        let lifecycle = Lifecycle::new(probe);

        assert!(lifecycle.stop().await);
        assert_eq!(lifecycle.start().await, Ok(false));
        assert_eq!(hooks.starts.load(Ordering::SeqCst), 0);
        assert!(!lifecycle.is_running());
    }

    #[tokio::test]
    async fn test_second_stop_is_noop() {
        let (probe, hooks) = Probe::new();
        let lifecycle = Lifecycle::new(probe);

        assert!(lifecycle.stop().await);
        assert!(!lifecycle.stop().await);
        assert_eq!(hooks.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_stop_hook_still_stops() {
        let (probe, hooks) = Probe::new();
        hooks.fail_stop.store(true, Ordering::SeqCst);
        let lifecycle = Lifecycle::new(probe);
        lifecycle.start().await.expect("start");

        assert!(lifecycle.stop().await);
        assert_eq!(lifecycle.status(), LifecycleStatus::Stopped);
        timeout(Duration::from_millis(100), lifecycle.wait())
            .await
            .expect("termination fired despite stop hook failure");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_releases_all_waiters() {
        let (probe, _hooks) = Probe::new();
        let lifecycle = Arc::new(Lifecycle::new(probe));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(async move { lifecycle.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        lifecycle.stop().await;

        for waiter in waiters {
            timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter released")
                .expect("waiter task");
        }

        // Waiting after termination returns immediately.
        timeout(Duration::from_millis(100), lifecycle.wait())
            .await
            .expect("idempotent wait");
    }

    #[tokio::test]
    async fn test_bound_handle_observes_lifecycle() {
        let (probe, _hooks) = Probe::new();
        let slot = Arc::clone(&probe.handle);
        let lifecycle = Lifecycle::new(probe);

        let handle = slot.lock().clone().expect("bind called on wrap");
        assert_eq!(handle.name(), "probe");
        assert!(!handle.is_running());

        lifecycle.start().await.expect("start");
        assert!(handle.is_running());

        let mut termination = handle.termination();
        lifecycle.stop().await;
        assert!(handle.is_terminated());
        termination.changed().await.expect("termination signal");
        assert!(*termination.borrow());
    }

    #[tokio::test]
    async fn test_call_delegates() {
        let (probe, _hooks) = Probe::new();
        let lifecycle = Lifecycle::new(probe);
        assert_eq!(
            lifecycle.call("anything", vec![]).await,
            Err(MethodError::MethodNotFound("anything".to_string()))
        );
    }

    #[test]
    fn test_lifecycle_event_topics() {
        assert_eq!(LifecycleEvent::Start.topic("pinger"), "pinger:start");
        assert_eq!(LifecycleEvent::Error.topic("relay"), "relay:error");
        assert_eq!(LifecycleEvent::Start.as_str(), "start");
    }
}
