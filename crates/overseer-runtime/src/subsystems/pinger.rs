use super::{announce, PINGER};
use crate::lifecycle::{LifecycleEvent, LifecycleHandle};
use crate::subsystem::{Subsystem, SubsystemError, SubsystemErrorKind};
use async_trait::async_trait;
use overseer_bus::{EventBus, MethodError};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(1);

/// Answers `ping` with `"pong"`.
pub struct Pinger {
    bus: EventBus,
    heartbeat: Duration,
    beats: Arc<AtomicU64>,
    lifecycle: Option<LifecycleHandle>,
}

impl Pinger {
    pub fn new(bus: EventBus) -> Self {
        Self::with_heartbeat(bus, DEFAULT_HEARTBEAT)
    }

    pub fn with_heartbeat(bus: EventBus, heartbeat: Duration) -> Self {
        Self {
            bus,
            heartbeat,
            beats: Arc::new(AtomicU64::new(0)),
            lifecycle: None,
        }
    }

    /// Heartbeats emitted so far. Stops growing once the pinger is stopped.
    #[must_use]
    pub fn beats(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.beats)
    }
}

#[async_trait]
impl Subsystem for Pinger {
    fn name(&self) -> &str {
        PINGER
    }

    async fn on_start(&self) -> Result<(), SubsystemError> {
        let handle = self.lifecycle.clone().ok_or_else(|| {
            SubsystemError::new(
                PINGER,
                SubsystemErrorKind::StartFailed,
                "not wrapped in a lifecycle",
            )
        })?;

        let mut termination = handle.termination();
        let beats = Arc::clone(&self.beats);
        let period = self.heartbeat;
        tokio::spawn(async move {
            // A stop during start is already marked seen by `changed()`.
            if *termination.borrow_and_update() {
                debug!(subsystem = PINGER, "Stopped before heartbeat began");
                return;
            }
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    changed = termination.changed() => {
                        if changed.is_err() || *termination.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let n = beats.fetch_add(1, Ordering::Relaxed) + 1;
                        trace!(subsystem = PINGER, beat = n, "Heartbeat");
                    }
                }
            }
            debug!(subsystem = PINGER, "Heartbeat stopped");
        });

        announce(&self.bus, PINGER, LifecycleEvent::Start).await;
        info!(subsystem = PINGER, "Pinger started");
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), SubsystemError> {
        announce(&self.bus, PINGER, LifecycleEvent::Error).await;
        Ok(())
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>, MethodError> {
        match method {
            "ping" => {
                info!(subsystem = PINGER, ?args, "ping called");
                Ok(Some(Value::from("pong")))
            }
            other => Err(MethodError::MethodNotFound(other.to_string())),
        }
    }

    fn bind(&mut self, handle: LifecycleHandle) {
        self.lifecycle = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;
    use overseer_bus::Payload;
    use parking_lot::Mutex;
    use serde_json::json;

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let pinger = Pinger::new(EventBus::new());
        assert_eq!(pinger.call("ping", vec![json!("hi")]).await, Ok(Some(json!("pong"))));
        assert_eq!(pinger.call("ping", vec![]).await, Ok(Some(json!("pong"))));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let pinger = Pinger::new(EventBus::new());
        assert_eq!(
            pinger.call("pong", vec![]).await,
            Err(MethodError::MethodNotFound("pong".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unwrapped_pinger_refuses_to_start() {
        let pinger = Pinger::new(EventBus::new());
        let err = pinger.on_start().await.unwrap_err();
        assert_eq!(err.kind, SubsystemErrorKind::StartFailed);
    }

    #[tokio::test]
    async fn test_announces_lifecycle_events() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for topic in ["pinger:start", "pinger:error"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(topic, move |p| {
                assert_eq!(p, Payload::Empty);
                seen.lock().push(topic);
            });
        }

        let lifecycle = Lifecycle::new(Pinger::new(bus.clone()));
        lifecycle.start().await.unwrap();
        lifecycle.stop().await;

        assert_eq!(*seen.lock(), vec!["pinger:start", "pinger:error"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_heartbeat_when_stopped_during_start() {
        let owner = Lifecycle::new(Pinger::new(EventBus::new()));
        let handle = owner.handle();
        owner.stop().await;

        let mut pinger = Pinger::with_heartbeat(EventBus::new(), Duration::from_millis(5));
        let beats = pinger.beats();
        pinger.bind(handle);
        pinger.on_start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(beats.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_heartbeat_stops_on_termination() {
        let pinger = Pinger::with_heartbeat(EventBus::new(), Duration::from_millis(5));
        let beats = pinger.beats();
        let lifecycle = Lifecycle::new(pinger);

        lifecycle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(beats.load(Ordering::Relaxed) > 0);

        lifecycle.stop().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let settled = beats.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(beats.load(Ordering::Relaxed), settled);
    }
}
