//! Request validation for the demo backend.
//!
//! Validation problems are raised as classified failures whose `message` is
//! the list of everything that is wrong with the request, so the normalizer
//! can hand back the first one and forward the full list.

use axum::{
    extract::Request,
    http::{header::CONTENT_LENGTH, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use error_normalizer::HttpFailure;
use jsonschema::{Draft, JSONSchema};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Maximum request payload size (64KB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Errors raised while setting up request validation
#[derive(Debug, Error)]
pub enum ValidationSetupError {
    #[error("Invalid item schema: {0}")]
    InvalidSchema(String),
}

/// Body accepted by `POST /items`
#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub price_cents: u64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Compiled schema for new items
pub struct ItemValidator {
    schema: JSONSchema,
}

impl ItemValidator {
    pub fn new() -> Result<Self, ValidationSetupError> {
        let schema = json!({
            "type": "object",
            "required": ["name", "price_cents"],
            "properties": {
                "name": {
                    "type": "string",
                    "minLength": 1,
                    "maxLength": 128
                },
                "price_cents": {
                    "type": "integer",
                    "minimum": 1
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string", "maxLength": 32 },
                    "maxItems": 8
                }
            },
            "additionalProperties": false
        });

        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| ValidationSetupError::InvalidSchema(e.to_string()))?;

        Ok(Self { schema })
    }

    /// Validates and parses a new item, collecting every violation
    pub fn validate(&self, payload: &Value) -> Result<NewItem, HttpFailure> {
        if let Err(errors) = self.schema.validate(payload) {
            let messages: Vec<Value> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        Value::String(e.to_string())
                    } else {
                        Value::String(format!("{}: {}", path.trim_start_matches('/'), e))
                    }
                })
                .collect();
            return Err(HttpFailure::bad_request(messages));
        }

        serde_json::from_value(payload.clone())
            .map_err(|e| HttpFailure::bad_request(vec![Value::String(e.to_string())]))
    }
}

/// Validate the Content-Type header
pub fn validate_content_type(headers: &HeaderMap, expected: &str) -> Result<(), HttpFailure> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !content_type.starts_with(expected) {
        return Err(HttpFailure::standard(
            415,
            format!("Expected content type '{}', got '{}'", expected, content_type),
        ));
    }

    Ok(())
}

/// Rejects requests whose declared length exceeds [`MAX_PAYLOAD_SIZE`]
pub async fn enforce_payload_limit(request: Request, next: Next) -> Response {
    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    match declared {
        Some(size) if size > MAX_PAYLOAD_SIZE => HttpFailure::standard(
            413,
            format!(
                "Request size {} exceeds maximum allowed size {}",
                size, MAX_PAYLOAD_SIZE
            ),
        )
        .into_response(),
        _ => next.run(request).await,
    }
}

/// Caps bodies without a declared length; overruns surface as body
/// extraction failures
pub fn payload_limit_config() -> tower_http::limit::RequestBodyLimitLayer {
    tower_http::limit::RequestBodyLimitLayer::new(MAX_PAYLOAD_SIZE)
}
