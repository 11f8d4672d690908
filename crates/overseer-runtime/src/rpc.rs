//! # Method Calls over the Bus
//!
//! Client side of the request/response protocol:
//!
//! 1. Draw a fresh correlation ID.
//! 2. Subscribe once on it.
//! 3. Publish the [`MethodRequest`] to [`METHOD_TOPIC`].
//! 4. Wait for the single [`MethodResponse`].

use overseer_bus::{
    EventBus, HandlerId, MethodError, MethodRequest, MethodResponse, Payload, METHOD_TOPIC,
};
use parking_lot::Mutex;
use primitive_types::U256;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Order of the secp256k1 group. Correlation IDs are drawn below it.
pub const SECP256K1_GENERATOR_ORDER: U256 = U256([
    0xBFD2_5E8C_D036_4141,
    0xBAAE_DCE6_AF48_A03B,
    0xFFFF_FFFF_FFFF_FFFE,
    0xFFFF_FFFF_FFFF_FFFF,
]);

/// Redraws before giving up. Each draw is rejected with probability ~2^-128.
const MAX_DRAWS: usize = 16;

/// Generate a correlation ID: a uniform random integer below
/// [`SECP256K1_GENERATOR_ORDER`] from the OS RNG, as lowercase hex.
///
/// # Errors
///
/// `MethodError::Transport` if the OS RNG fails.
pub fn generate_correlation_id() -> Result<String, MethodError> {
    let mut bytes = [0u8; 32];
    for _ in 0..MAX_DRAWS {
        OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
            MethodError::Transport(format!("could not generate correlation id: {e}"))
        })?;

        let candidate = U256::from_big_endian(&bytes);
        if candidate < SECP256K1_GENERATOR_ORDER {
            return Ok(format!("{candidate:x}"));
        }
    }
    Err(MethodError::Transport(
        "could not generate correlation id: rejection limit reached".to_string(),
    ))
}

/// Subscribe once-async on `topic` and return a receiver for the first value
/// delivered there.
///
/// The receiver errors if the delivery is suppressed by middleware or the
/// handler is unsubscribed before firing.
pub fn await_topic(bus: &EventBus, topic: &str) -> (HandlerId, oneshot::Receiver<Payload>) {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));

    let id = bus.subscribe_once_async(topic, move |payload| {
        let sender = slot.lock().take();
        async move {
            if let Some(tx) = sender {
                // The caller may have given up waiting.
                let _ = tx.send(payload);
            }
        }
    });
    (id, rx)
}

/// Invoke `method` on `subsystem` and wait for the response. No timeout.
///
/// Never fails outright: every failure is reported in the response's
/// `error` field.
pub async fn subsystem_method(
    bus: &EventBus,
    caller: &str,
    subsystem: &str,
    method: &str,
    args: Vec<Value>,
) -> MethodResponse {
    let (request, _, response) = match send_request(bus, caller, subsystem, method, args).await {
        Ok(sent) => sent,
        Err(error) => return MethodResponse::failure(error),
    };
    receive(&request, response.await)
}

/// Like [`subsystem_method`], but give up after `timeout`.
///
/// On expiry the correlation topic is unsubscribed so a late response is
/// dropped, and the response carries `MethodError::Timeout`.
pub async fn subsystem_method_timeout(
    bus: &EventBus,
    caller: &str,
    subsystem: &str,
    method: &str,
    args: Vec<Value>,
    timeout: Duration,
) -> MethodResponse {
    let sent = send_request(bus, caller, subsystem, method, args).await;
    let (request, handler, response) = match sent {
        Ok(sent) => sent,
        Err(error) => return MethodResponse::failure(error),
    };

    match tokio::time::timeout(timeout, response).await {
        Ok(received) => receive(&request, received),
        Err(_) => {
            // Already gone if the response raced the deadline.
            let _ = bus.unsubscribe(&request.correlation_id, handler);
            warn!(
                correlation_id = %request.correlation_id,
                subsystem = %subsystem,
                method = %method,
                ?timeout,
                "Method call timed out"
            );
            MethodResponse::failure(MethodError::Timeout(format!(
                "{subsystem}.{method} within {timeout:?}"
            )))
        }
    }
}

async fn send_request(
    bus: &EventBus,
    caller: &str,
    subsystem: &str,
    method: &str,
    args: Vec<Value>,
) -> Result<(MethodRequest, HandlerId, oneshot::Receiver<Payload>), MethodError> {
    let correlation_id = generate_correlation_id()?;
    let (handler, response) = await_topic(bus, &correlation_id);

    let request = MethodRequest {
        caller: caller.to_string(),
        subsystem: subsystem.to_string(),
        method: method.to_string(),
        correlation_id,
        args,
    };
    debug!(
        correlation_id = %request.correlation_id,
        caller = %caller,
        subsystem = %subsystem,
        method = %method,
        "Sending method request"
    );
    bus.publish(METHOD_TOPIC, Payload::Request(request.clone())).await;

    Ok((request, handler, response))
}

fn receive(
    request: &MethodRequest,
    received: Result<Payload, oneshot::error::RecvError>,
) -> MethodResponse {
    match received {
        Ok(Payload::Response(response)) => response,
        Ok(other) => {
            warn!(
                correlation_id = %request.correlation_id,
                kind = other.kind(),
                "Unexpected payload on correlation topic"
            );
            MethodResponse::failure(MethodError::Transport(
                "method response was not of MethodResponse type".to_string(),
            ))
        }
        Err(_) => MethodResponse::failure(MethodError::Transport(
            "response channel closed before a response arrived".to_string(),
        )),
    }
}
