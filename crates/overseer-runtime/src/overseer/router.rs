//! # Method Router
//!
//! Standing subscriber on [`METHOD_TOPIC`]. Each request is handled on its own
//! task and answered with exactly one [`MethodResponse`] on the request's
//! correlation topic.

use super::Registry;
use crate::config::RetryPolicy;
use crate::lifecycle::Lifecycle;
use overseer_bus::{
    EventBus, HandlerId, MethodError, MethodRequest, MethodResponse, Payload, METHOD_TOPIC,
};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

pub(crate) struct Router {
    bus: EventBus,
    registry: Registry,
    retry: RetryPolicy,
}

impl Router {
    pub(crate) fn new(bus: EventBus, registry: Registry, retry: RetryPolicy) -> Self {
        Self { bus, registry, retry }
    }

    /// Subscribe the router on the method topic.
    pub(crate) fn install(self) -> HandlerId {
        let bus = self.bus.clone();
        let router = Arc::new(self);
        bus.subscribe_async(
            METHOD_TOPIC,
            move |payload| {
                let router = Arc::clone(&router);
                async move { router.handle(payload).await }
            },
            false,
        )
    }

    async fn handle(&self, payload: Payload) {
        match payload {
            Payload::Request(request) => self.route(request).await,
            other => {
                error!(
                    topic = METHOD_TOPIC,
                    kind = other.kind(),
                    "Dropping malformed payload (expected MethodRequest)"
                );
            }
        }
    }

    #[instrument(
        skip(self, request),
        name = "route_method",
        fields(
            correlation_id = %request.correlation_id,
            caller = %request.caller,
            subsystem = %request.subsystem,
            method = %request.method
        )
    )]
    async fn route(&self, request: MethodRequest) {
        let response = match self.resolve(&request.subsystem).await {
            Ok(target) => self.dispatch(target, request.clone()).await,
            Err(e) => MethodResponse {
                request: Some(request.clone()),
                error: Some(e),
                data: None,
            },
        };

        debug!(failed = response.error.is_some(), "Publishing method response");
        self.bus
            .publish(&request.correlation_id, Payload::Response(response))
            .await;
    }

    /// Look the subsystem up until it is registered and running, or the
    /// retry budget is spent.
    async fn resolve(&self, name: &str) -> Result<Arc<Lifecycle>, MethodError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.lookup(name) {
                Ok(target) => return Ok(target),
                Err(e) => e,
            };
            warn!(attempt, attempts, error = %err, "Subsystem not available");

            if attempt >= attempts {
                return Err(err);
            }
            tokio::time::sleep(self.retry.delay_for(attempt)).await;
            attempt += 1;
        }
    }

    fn lookup(&self, name: &str) -> Result<Arc<Lifecycle>, MethodError> {
        let target = self
            .registry
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MethodError::SubsystemNotFound(name.to_string()))?;

        if !target.is_running() {
            return Err(MethodError::SubsystemNotRunning(name.to_string()));
        }
        Ok(target)
    }

    /// Run the call on its own task so a panic surfaces as a `JoinError`.
    async fn dispatch(&self, target: Arc<Lifecycle>, request: MethodRequest) -> MethodResponse {
        let method = request.method.clone();
        let args = request.args.clone();
        let outcome = tokio::spawn(async move { target.call(&method, args).await }).await;

        let result = match outcome {
            Ok(result) => result,
            Err(join) if join.is_panic() => {
                let message = panic_message(join.into_panic());
                error!(panic = %message, "Subsystem method panicked");
                Err(MethodError::Fault(message))
            }
            Err(join) => Err(MethodError::Fault(join.to_string())),
        };
        MethodResponse::from_result(request, result)
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
