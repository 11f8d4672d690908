use super::{announce, RELAY};
use crate::library::SubsystemLibrary;
use crate::lifecycle::LifecycleEvent;
use crate::subsystem::{Subsystem, SubsystemError};
use async_trait::async_trait;
use overseer_bus::{EventBus, MethodError};
use serde_json::Value;
use tracing::info;

/// Answers `ping` itself and forwards `call_pinger` to the pinger.
pub struct Relay {
    bus: EventBus,
    library: SubsystemLibrary,
}

impl Relay {
    pub fn new(bus: EventBus) -> Self {
        let library = SubsystemLibrary::new(bus.clone(), RELAY);
        Self { bus, library }
    }

    async fn call_pinger(&self, args: &[Value]) -> Result<Option<Value>, MethodError> {
        let message = match args {
            [Value::String(message)] => message,
            [_] => {
                return Err(MethodError::InvalidArguments(
                    "call_pinger expects a string argument".to_string(),
                ))
            }
            _ => {
                return Err(MethodError::InvalidArguments(format!(
                    "call_pinger expects 1 argument, got {}",
                    args.len()
                )))
            }
        };
        self.library.pinger().ping(message).await
    }
}

#[async_trait]
impl Subsystem for Relay {
    fn name(&self) -> &str {
        RELAY
    }

    async fn on_start(&self) -> Result<(), SubsystemError> {
        announce(&self.bus, RELAY, LifecycleEvent::Start).await;
        info!(subsystem = RELAY, "Relay started");
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), SubsystemError> {
        announce(&self.bus, RELAY, LifecycleEvent::Error).await;
        Ok(())
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>, MethodError> {
        info!(subsystem = RELAY, method = %method, ?args, "Method called");
        match method {
            "ping" => Ok(Some(Value::from("pong"))),
            "call_pinger" => self.call_pinger(&args).await,
            "process_active_leaves_update" => Ok(None),
            other => Err(MethodError::MethodNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_local_methods() {
        let relay = Relay::new(EventBus::new());
        assert_eq!(relay.call("ping", vec![]).await, Ok(Some(json!("pong"))));
        assert_eq!(relay.call("process_active_leaves_update", vec![]).await, Ok(None));
        assert!(matches!(
            relay.call("nope", vec![]).await,
            Err(MethodError::MethodNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_call_pinger_checks_arguments() {
        let relay = Relay::new(EventBus::new());

        let err = relay.call("call_pinger", vec![]).await.unwrap_err();
        assert_eq!(
            err,
            MethodError::InvalidArguments("call_pinger expects 1 argument, got 0".to_string())
        );

        let err = relay.call("call_pinger", vec![json!(5)]).await.unwrap_err();
        assert_eq!(
            err,
            MethodError::InvalidArguments("call_pinger expects a string argument".to_string())
        );
    }
}
