//! # Failure Types
//!
//! The failure model handled at the request boundary. A failure is either
//! *classified* (it already knows its HTTP status and response payload) or
//! *unclassified* (an opaque error that will surface as an internal error).

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;

use axum::http::StatusCode;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Status used for unclassified failures and classified failures without a status
pub const INTERNAL_SERVER_ERROR: u16 = 500;

/// Message returned to callers for unclassified failures
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Response payload carried by a classified failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// A bare string payload
    Text(String),
    /// A structured JSON object payload
    Object(Map<String, Value>),
}

impl Payload {
    /// Returns the payload as a JSON value
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Text(text) => Value::String(text.clone()),
            Payload::Object(map) => Value::Object(map.clone()),
        }
    }

    /// Returns the structured object, if any
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Object(map) => Some(map),
            Payload::Text(_) => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Payload::Object(map),
            Value::String(text) => Payload::Text(text),
            other => Payload::Text(other.to_string()),
        }
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload::Object(map)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

/// A failure that carries an HTTP status and a response payload
#[derive(Debug, Clone)]
pub struct HttpFailure {
    status: Option<u16>,
    response: Payload,
    stack: Option<String>,
}

impl HttpFailure {
    /// Creates a classified failure with the given status and payload
    pub fn new<P: Into<Payload>>(status: u16, response: P) -> Self {
        Self {
            status: Some(status),
            response: response.into(),
            stack: capture_stack(),
        }
    }

    /// Creates a classified failure whose status is unknown
    pub fn without_status<P: Into<Payload>>(response: P) -> Self {
        Self {
            status: None,
            response: response.into(),
            stack: capture_stack(),
        }
    }

    /// Creates a failure with the conventional `{statusCode, message, error}` payload,
    /// where `error` is the canonical reason phrase of the status.
    pub fn standard<M: Into<Value>>(status: u16, message: M) -> Self {
        let mut payload = Map::new();
        payload.insert("statusCode".into(), Value::from(status));
        payload.insert("message".into(), message.into());
        if let Some(reason) = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
        {
            payload.insert("error".into(), Value::String(reason.to_string()));
        }
        Self::new(status, payload)
    }

    pub fn bad_request<M: Into<Value>>(message: M) -> Self {
        Self::standard(400, message)
    }

    pub fn unauthorized<M: Into<Value>>(message: M) -> Self {
        Self::standard(401, message)
    }

    pub fn forbidden<M: Into<Value>>(message: M) -> Self {
        Self::standard(403, message)
    }

    pub fn not_found<M: Into<Value>>(message: M) -> Self {
        Self::standard(404, message)
    }

    pub fn conflict<M: Into<Value>>(message: M) -> Self {
        Self::standard(409, message)
    }

    /// Overrides the captured stack trace
    pub fn with_stack<S: Into<String>>(mut self, stack: S) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn response(&self) -> &Payload {
        &self.response
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Human-readable summary of the failure.
    ///
    /// Uses the payload's `message` (joined when it is an array), the
    /// bare string payload, or a generic fallback.
    pub fn message(&self) -> String {
        match &self.response {
            Payload::Text(text) => text.clone(),
            Payload::Object(map) => match map.get("message") {
                Some(Value::String(message)) => message.clone(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => "Http Exception".to_string(),
            },
        }
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message()),
            None => write!(f, "HTTP failure: {}", self.message()),
        }
    }
}

/// An opaque failure with no status of its own
#[derive(Debug)]
pub struct UnclassifiedFailure {
    name: &'static str,
    source: Box<dyn StdError + Send + Sync>,
    stack: Option<String>,
}

impl UnclassifiedFailure {
    /// Wraps an arbitrary error
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            name: short_type_name::<E>(),
            source: Box::new(error),
            stack: capture_stack(),
        }
    }

    /// Wraps a plain message as an error
    pub fn msg<S: Into<String>>(message: S) -> Self {
        Self {
            name: "Error",
            source: Box::new(MessageError(message.into())),
            stack: capture_stack(),
        }
    }

    /// Overrides the captured stack trace
    pub fn with_stack<S: Into<String>>(mut self, stack: S) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Short type name of the wrapped error
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn message(&self) -> String {
        self.source.to_string()
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    pub fn source(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

impl fmt::Display for UnclassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.source)
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

/// A failure caught at the request boundary
#[derive(Debug)]
pub enum Failure {
    /// Carries a status and a response payload
    Classified(HttpFailure),
    /// Anything else
    Unclassified(UnclassifiedFailure),
}

impl Failure {
    /// Wraps a plain message as an unclassified failure
    pub fn msg<S: Into<String>>(message: S) -> Self {
        Failure::Unclassified(UnclassifiedFailure::msg(message))
    }

    pub fn is_classified(&self) -> bool {
        matches!(self, Failure::Classified(_))
    }

    /// The status the caller will receive for this failure
    pub fn status(&self) -> u16 {
        match self {
            Failure::Classified(failure) => failure.status().unwrap_or(INTERNAL_SERVER_ERROR),
            Failure::Unclassified(_) => INTERNAL_SERVER_ERROR,
        }
    }

    /// Name used when the failure is reported
    pub fn name(&self) -> &str {
        match self {
            Failure::Classified(_) => "HttpFailure",
            Failure::Unclassified(failure) => failure.name(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Failure::Classified(failure) => failure.message(),
            Failure::Unclassified(failure) => failure.message(),
        }
    }

    pub fn stack(&self) -> Option<&str> {
        match self {
            Failure::Classified(failure) => failure.stack(),
            Failure::Unclassified(failure) => failure.stack(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Classified(failure) => fmt::Display::fmt(failure, f),
            Failure::Unclassified(failure) => fmt::Display::fmt(failure, f),
        }
    }
}

impl From<HttpFailure> for Failure {
    fn from(failure: HttpFailure) -> Self {
        Failure::Classified(failure)
    }
}

impl From<UnclassifiedFailure> for Failure {
    fn from(failure: UnclassifiedFailure) -> Self {
        Failure::Unclassified(failure)
    }
}

// `Failure` must not implement `std::error::Error`; this impl would overlap.
impl<E> From<E> for Failure
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Failure::Unclassified(UnclassifiedFailure::new(error))
    }
}

impl Serialize for Failure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Failure", 4)?;
        state.serialize_field("name", self.name())?;
        state.serialize_field("message", &self.message())?;
        match self {
            Failure::Classified(failure) => {
                state.serialize_field("status", &failure.status())?;
                state.serialize_field("response", failure.response())?;
            }
            Failure::Unclassified(_) => {
                state.skip_field("status")?;
                state.skip_field("response")?;
            }
        }
        state.end()
    }
}

fn capture_stack() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
