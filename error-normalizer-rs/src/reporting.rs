//! # Telemetry Forwarding
//!
//! The capabilities the normalizer forwards to (a local diagnostic sink and
//! the monitoring backend's exception and log-event channels), the records
//! that travel over them, and reference implementations.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::{CaptureParams, RequestContext, ResponseContext};
use crate::monitoring;
use crate::settings::TelemetryConfig;
use crate::types::Failure;

/// Errors raised by the local diagnostic sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while forwarding to the monitoring backend
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Collector returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Forwarding timed out after {0:?}")]
    Timeout(Duration),

    #[error("Forwarding task panicked")]
    Panicked,

    #[error("Invalid collector configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ForwardError {
    fn from(err: reqwest::Error) -> Self {
        ForwardError::Http(err.to_string())
    }
}

/// Severity of a forwarded log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Payload for the monitoring backend's raw-exception channel
#[derive(Debug, Clone)]
pub struct ErrorReportingRecord {
    /// The failure as caught
    pub failure: Arc<Failure>,
    /// The request being served
    pub request: RequestContext,
    /// The response being produced
    pub response: ResponseContext,
    /// Capture parameters
    pub params: CaptureParams,
}

impl ErrorReportingRecord {
    /// Renders the record as collector JSON, leaving out excluded headers
    pub fn to_payload(&self) -> Value {
        json!({
            "id": self.params.record_id,
            "capturedAt": self.params.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "error": &*self.failure,
            "stack": self.failure.stack(),
            "request": {
                "method": self.request.method,
                "url": self.request.url,
                "headers": self.request.filtered_headers(&self.params.exclude_header_prefixes),
            },
            "response": {
                "statusCode": self.response.status_code,
            },
        })
    }
}

/// Structured log event for the monitoring backend's log-event channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// The failure's response payload before sanitization
    pub message: Value,
    pub level: LogLevel,
    /// Serialized failure summary
    pub error: Value,
    pub status_code: u16,
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Request URL
    pub path: String,
}

impl LogEvent {
    /// Builds an `ERROR` event stamped with the given time
    pub fn error_at(
        message: Value,
        failure: &Failure,
        status_code: u16,
        path: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            message,
            level: LogLevel::Error,
            error: serde_json::to_value(failure).unwrap_or(Value::Null),
            status_code,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            path: path.to_string(),
        }
    }
}

/// Local diagnostic sink, written to before anything is forwarded
pub trait DiagnosticSink: Send + Sync {
    fn log(&self, message: &str, trace: Option<&str>) -> Result<(), SinkError>;
}

/// Raw-exception channel of the monitoring backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExceptionChannel: Send + Sync {
    async fn report_exception(&self, record: ErrorReportingRecord) -> Result<(), ForwardError>;
}

/// Log-event channel of the monitoring backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogEventChannel: Send + Sync {
    async fn report_log_event(&self, event: LogEvent) -> Result<(), ForwardError>;
}

/// Diagnostic sink backed by `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn log(&self, message: &str, trace: Option<&str>) -> Result<(), SinkError> {
        match trace {
            Some(trace) => tracing::error!(trace = %trace, "{}", message),
            None => tracing::error!("{}", message),
        }
        Ok(())
    }
}

/// Collector that accepts and discards everything
#[derive(Debug, Clone, Default)]
pub struct NoopCollector;

#[async_trait]
impl ExceptionChannel for NoopCollector {
    async fn report_exception(&self, record: ErrorReportingRecord) -> Result<(), ForwardError> {
        tracing::debug!(record_id = %record.params.record_id, "Exception forwarding disabled");
        Ok(())
    }
}

#[async_trait]
impl LogEventChannel for NoopCollector {
    async fn report_log_event(&self, event: LogEvent) -> Result<(), ForwardError> {
        tracing::debug!(path = %event.path, "Log forwarding disabled");
        Ok(())
    }
}

/// Collector that POSTs records as JSON to a monitoring endpoint
pub struct HttpCollector {
    endpoint: String,
    app_name: String,
    license_key: Option<String>,
    client: reqwest::Client,
    /// Recently forwarded payloads kept in memory for inspection
    recent: Mutex<VecDeque<Value>>,
    max_samples_stored: usize,
}

impl fmt::Debug for HttpCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCollector")
            .field("endpoint", &self.endpoint)
            .field("app_name", &self.app_name)
            .field("max_samples_stored", &self.max_samples_stored)
            .finish_non_exhaustive()
    }
}

impl HttpCollector {
    /// Creates a collector for the configured endpoint
    pub fn new(config: &TelemetryConfig) -> Result<Self, ForwardError> {
        let endpoint = config
            .collector_endpoint
            .clone()
            .ok_or_else(|| ForwardError::Config("no collector endpoint configured".into()))?;

        let client = reqwest::Client::builder()
            .timeout(config.forward_timeout())
            .build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            app_name: config.app_name.clone(),
            license_key: config.license_key.clone(),
            client,
            recent: Mutex::new(VecDeque::with_capacity(config.max_samples_stored)),
            max_samples_stored: config.max_samples_stored,
        })
    }

    /// Payloads forwarded most recently, oldest first
    pub fn recent_samples(&self) -> Vec<Value> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.iter().cloned().collect()
    }

    async fn post(&self, route: &str, payload: Value) -> Result<(), ForwardError> {
        let url = format!("{}/{}", self.endpoint, route);

        let mut request = self
            .client
            .post(&url)
            .header("X-App-Name", &self.app_name)
            .json(&payload);

        if let Some(key) = &self.license_key {
            request = request.header("X-License-Key", key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Error reading response".to_string());
            return Err(ForwardError::Rejected { status, body });
        }

        self.remember(payload);
        Ok(())
    }

    fn remember(&self, payload: Value) {
        if self.max_samples_stored == 0 {
            return;
        }
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.push_back(payload);
        while recent.len() > self.max_samples_stored {
            recent.pop_front();
        }
    }
}

#[async_trait]
impl ExceptionChannel for HttpCollector {
    async fn report_exception(&self, record: ErrorReportingRecord) -> Result<(), ForwardError> {
        let result = self.post("v1/exceptions", record.to_payload()).await;
        monitoring::record_forward("exception", result.is_ok());
        result
    }
}

#[async_trait]
impl LogEventChannel for HttpCollector {
    async fn report_log_event(&self, event: LogEvent) -> Result<(), ForwardError> {
        let payload = serde_json::to_value(&event)?;
        let result = self.post("v1/logs", payload).await;
        monitoring::record_forward("log_event", result.is_ok());
        result
    }
}
