//! # Bus Payloads
//!
//! Defines every value that can travel over the event bus, including the
//! request/response messages of the subsystem method protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A value published on a topic.
///
/// Handlers pattern-match the variant they expect and treat anything else as
/// a malformed delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// No data. Used by lifecycle event topics.
    Empty,

    /// An arbitrary value.
    Value(Value),

    /// A subsystem method request (published on [`crate::METHOD_TOPIC`]).
    Request(MethodRequest),

    /// A subsystem method response (published on a correlation topic).
    Response(MethodResponse),
}

impl Payload {
    /// Short name of the variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Value(_) => "value",
            Self::Request(_) => "request",
            Self::Response(_) => "response",
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<MethodRequest> for Payload {
    fn from(request: MethodRequest) -> Self {
        Self::Request(request)
    }
}

impl From<MethodResponse> for Payload {
    fn from(response: MethodResponse) -> Self {
        Self::Response(response)
    }
}

/// Request to invoke `method` on the subsystem named `subsystem`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodRequest {
    /// Name of the calling party.
    pub caller: String,
    /// Target subsystem name.
    pub subsystem: String,
    /// Method name understood by the target.
    pub method: String,
    /// Single-use topic the response is published on.
    pub correlation_id: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

/// Reply to a [`MethodRequest`].
///
/// Exactly one of `error` and `data` is meaningful: a failed call carries an
/// error and no data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodResponse {
    /// Echo of the request that produced this response, when known.
    pub request: Option<MethodRequest>,
    /// Failure, if any.
    pub error: Option<MethodError>,
    /// Result data.
    pub data: Option<Value>,
}

impl MethodResponse {
    /// A response carrying only an error.
    #[must_use]
    pub fn failure(error: MethodError) -> Self {
        Self {
            request: None,
            error: Some(error),
            data: None,
        }
    }

    /// Build a response from the outcome of a subsystem call.
    #[must_use]
    pub fn from_result(request: MethodRequest, result: Result<Option<Value>, MethodError>) -> Self {
        match result {
            Ok(data) => Self {
                request: Some(request),
                error: None,
                data,
            },
            Err(error) => Self {
                request: Some(request),
                error: Some(error),
                data: None,
            },
        }
    }

    /// Collapse into a plain result, dropping the request echo.
    pub fn into_result(self) -> Result<Option<Value>, MethodError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

/// Errors carried inside a [`MethodResponse`].
///
/// These never cross the bus as panics; they are data.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MethodError {
    /// No subsystem is registered under the name.
    #[error("could not find subsystem {0}")]
    SubsystemNotFound(String),

    /// The subsystem is registered but not running.
    #[error("subsystem {0} is not running")]
    SubsystemNotRunning(String),

    /// The subsystem does not implement the method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The arguments did not have the expected shape.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The subsystem reported a failure.
    #[error("{0}")]
    Application(String),

    /// The call panicked and was recovered by the router.
    #[error("panicked during call: {0}")]
    Fault(String),

    /// The request could not be sent or the reply could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply arrived in time (only with an explicit timeout).
    #[error("no response from {0}")]
    Timeout(String),
}

impl MethodError {
    /// Whether the error comes from resolving the target subsystem.
    #[must_use]
    pub fn is_routing(&self) -> bool {
        matches!(self, Self::SubsystemNotFound(_) | Self::SubsystemNotRunning(_))
    }
}
