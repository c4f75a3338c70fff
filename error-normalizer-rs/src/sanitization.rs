//! # Client Body Sanitization
//!
//! Turns a classified failure's response payload into the body that is
//! returned to callers. The status travels on the status line, so the body
//! never repeats it, and the human `error` label becomes a machine `code`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Payload, INTERNAL_ERROR_MESSAGE};

/// Sanitized error body returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientErrorBody(Value);

impl ClientErrorBody {
    /// The fixed body for unclassified failures
    pub fn internal() -> Self {
        let mut body = Map::new();
        body.insert(
            "message".into(),
            Value::String(INTERNAL_ERROR_MESSAGE.to_string()),
        );
        Self(Value::Object(body))
    }

    /// Derives the client body from a classified failure's payload.
    ///
    /// Object payloads have their `message` array collapsed to its first
    /// element, `error` replaced by a derived `code`, and `statusCode`
    /// removed. Bare strings pass through untouched.
    pub fn from_payload(payload: &Payload) -> Self {
        match payload {
            Payload::Text(text) => Self(Value::String(text.clone())),
            Payload::Object(map) => Self(Value::Object(sanitize_object(map))),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Field lookup on object bodies
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.as_object().and_then(|map| map.get(key))
    }
}

fn sanitize_object(original: &Map<String, Value>) -> Map<String, Value> {
    let mut body = original.clone();

    collapse_message(&mut body);

    // read from the untouched payload so the code always reflects the original label
    if original.contains_key("error") {
        if let Some(code) = original.get("error").and_then(Value::as_str).and_then(derive_code) {
            body.insert("code".into(), Value::String(code));
        }
        body.remove("error");
    }

    body.remove("statusCode");
    body
}

fn collapse_message(body: &mut Map<String, Value>) {
    if !matches!(body.get("message"), Some(Value::Array(_))) {
        return;
    }

    if let Some(first) = body.remove("message").and_then(first_scalar) {
        body.insert("message".into(), first);
    }
}

/// First entry of a message list, flattened to a scalar.
///
/// Nested lists collapse to their own first entry; objects are rendered as
/// JSON text.
fn first_scalar(message: Value) -> Option<Value> {
    match message {
        Value::Array(items) => items.into_iter().next().and_then(first_scalar),
        Value::Object(_) => Some(Value::String(message.to_string())),
        scalar => Some(scalar),
    }
}

/// Builds a machine code from a human error label.
///
/// `"Not Found"` becomes `"NOT_FOUND"`. Blank labels yield no code.
pub fn derive_code(error: &str) -> Option<String> {
    let words: Vec<String> = error.split_whitespace().map(str::to_uppercase).collect();
    if words.is_empty() {
        return None;
    }
    Some(words.join("_"))
}
