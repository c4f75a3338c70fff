//! # Error Normalizer
//!
//! Request-boundary error normalization with telemetry forwarding.
//!
//! Every failure caught while serving a request is turned into exactly one
//! status code and one sanitized JSON body. Along the way the failure is
//! written to a local diagnostic sink, forwarded as a raw exception to a
//! monitoring backend, and (for classified failures) forwarded as a
//! structured log event. Forwarding never affects the response.
//!
//! ## Features
//!
//! - Tagged failure model: classified (status + payload) vs. unclassified
//! - Client body sanitization: scalar `message`, derived `code`, no `statusCode`
//! - Injected capabilities for the sink and both backend channels
//! - Reference HTTP collector, layered configuration, structured logging
//! - Axum middleware, extractor and panic handling
//!

pub mod context;
pub mod http;
pub mod logging;
pub mod monitoring;
pub mod normalizer;
pub mod reporting;
pub mod sanitization;
pub mod settings;
pub mod types;

// Re-export commonly used types
pub use context::{CaptureParams, RequestContext, ResponseContext};
pub use logging::{init_logging, LoggingConfig, LoggingError};
pub use normalizer::{NormalizedResponse, Normalizer, NormalizerBuilder};
pub use reporting::{
    DiagnosticSink, ErrorReportingRecord, ExceptionChannel, ForwardError, HttpCollector,
    LogEvent, LogEventChannel, LogLevel, NoopCollector, SinkError, TracingSink,
};
pub use sanitization::{derive_code, ClientErrorBody};
pub use settings::{ConfigError, DispatchMode, TelemetryConfig};
pub use types::{Failure, HttpFailure, Payload, UnclassifiedFailure};

/// Errors raised while setting up telemetry at startup
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Collector(#[from] ForwardError),
}

/// Loads configuration, initializes logging and builds a normalizer
pub fn init(path: Option<&std::path::Path>) -> Result<(TelemetryConfig, Normalizer), InitError> {
    let config = TelemetryConfig::load(path)?;
    init_logging(&config.logging)?;
    let normalizer = Normalizer::from_config(&config)?;

    tracing::info!(
        app = %config.app_name,
        collector = config.collector_enabled(),
        dispatch = ?config.dispatch,
        "Error normalizer ready"
    );

    Ok((config, normalizer))
}
