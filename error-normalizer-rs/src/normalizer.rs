//! # Request-Boundary Normalizer
//!
//! Converts a failure caught while serving a request into a status code and
//! a sanitized client body, after recording it locally and forwarding it to
//! the monitoring backend.
//!
//! Forwarding is best effort and at most once. Nothing that happens while
//! recording or forwarding can change the response handed back to the
//! caller: errors, timeouts and panics are caught, counted and dropped.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::context::{CaptureParams, RequestContext, ResponseContext};
use crate::monitoring;
use crate::reporting::{
    DiagnosticSink, ErrorReportingRecord, ExceptionChannel, ForwardError, HttpCollector,
    LogEvent, LogEventChannel, NoopCollector, TracingSink,
};
use crate::sanitization::ClientErrorBody;
use crate::settings::{DispatchMode, TelemetryConfig};
use crate::types::{Failure, INTERNAL_SERVER_ERROR};

/// Status and body returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResponse {
    pub status: u16,
    pub body: ClientErrorBody,
}

impl NormalizedResponse {
    /// Status and body for a failure, without any side effects
    pub fn for_failure(failure: &Failure) -> Self {
        match failure {
            Failure::Classified(http) => Self {
                status: match http.status() {
                    Some(status @ 100..=999) => status,
                    _ => INTERNAL_SERVER_ERROR,
                },
                body: ClientErrorBody::from_payload(http.response()),
            },
            Failure::Unclassified(_) => Self {
                status: INTERNAL_SERVER_ERROR,
                body: ClientErrorBody::internal(),
            },
        }
    }
}

/// Turns caught failures into client responses and telemetry
#[derive(Clone)]
pub struct Normalizer {
    sink: Arc<dyn DiagnosticSink>,
    exceptions: Arc<dyn ExceptionChannel>,
    logs: Arc<dyn LogEventChannel>,
    dispatch: DispatchMode,
    forward_timeout: Duration,
    exclude_header_prefixes: Vec<String>,
    log_forwarding_enabled: bool,
}

impl Normalizer {
    pub fn builder() -> NormalizerBuilder {
        NormalizerBuilder::default()
    }

    /// Builds a normalizer with the collector described by `config`.
    ///
    /// Without an endpoint, or with telemetry disabled, records go nowhere.
    pub fn from_config(config: &TelemetryConfig) -> Result<Self, ForwardError> {
        let builder = Self::builder().config(config);

        if config.collector_enabled() {
            let collector = Arc::new(HttpCollector::new(config)?);
            Ok(builder.collector(collector).build())
        } else {
            debug!("No collector configured, telemetry forwarding disabled");
            Ok(builder.build())
        }
    }

    /// Normalizes a failure for the request described by `context`.
    ///
    /// Records the failure locally, forwards the raw exception, and for
    /// classified failures forwards a structured log event built from the
    /// payload as it was before sanitization.
    pub async fn handle<F>(&self, failure: F, context: &RequestContext) -> NormalizedResponse
    where
        F: Into<Arc<Failure>>,
    {
        let failure: Arc<Failure> = failure.into();
        let response = NormalizedResponse::for_failure(&failure);
        monitoring::record_failure(failure.is_classified(), response.status);

        self.record_locally(&failure, context);

        let record = ErrorReportingRecord {
            failure: Arc::clone(&failure),
            request: context.clone(),
            response: ResponseContext {
                status_code: response.status,
            },
            params: CaptureParams::new(self.exclude_header_prefixes.clone()),
        };
        let exceptions = Arc::clone(&self.exceptions);
        self.dispatch("exception", async move { exceptions.report_exception(record).await })
            .await;

        if let Failure::Classified(http) = &*failure {
            if self.log_forwarding_enabled {
                let event = LogEvent::error_at(
                    http.response().to_value(),
                    &failure,
                    response.status,
                    &context.url,
                    Utc::now(),
                );
                let logs = Arc::clone(&self.logs);
                self.dispatch("log_event", async move { logs.report_log_event(event).await })
                    .await;
            }
        }

        response
    }

    fn record_locally(&self, failure: &Failure, context: &RequestContext) {
        let message = format!("{} {} failed: {}", context.method, context.url, failure);
        let trace = failure.stack();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.sink.log(&message, trace)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Diagnostic sink failed"),
            Err(_) => warn!("Diagnostic sink panicked"),
        }
    }

    async fn dispatch<F>(&self, channel: &'static str, forward: F)
    where
        F: Future<Output = Result<(), ForwardError>> + Send + 'static,
    {
        let timeout = self.forward_timeout;
        let guarded = async move {
            if let Err(e) = guard_forward(forward, timeout).await {
                monitoring::record_discarded(channel, &e.to_string());
            }
        };

        match (self.dispatch, Handle::try_current()) {
            (DispatchMode::Detached, Ok(handle)) => {
                handle.spawn(guarded);
            }
            _ => guarded.await,
        }
    }
}

async fn guard_forward<F>(forward: F, timeout: Duration) -> Result<(), ForwardError>
where
    F: Future<Output = Result<(), ForwardError>> + Send,
{
    // timers need a tokio runtime; without one the forward runs unbounded.
    // A runtime built without its time driver panics when the timer is
    // created, so the timer lives inside the unwind boundary too.
    let bounded = async move {
        if Handle::try_current().is_ok() {
            match tokio::time::timeout(timeout, forward).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ForwardError::Timeout(timeout)),
            }
        } else {
            forward.await
        }
    };

    AssertUnwindSafe(bounded)
        .catch_unwind()
        .await
        .map_err(|_| ForwardError::Panicked)?
}

/// Builder for [`Normalizer`]
pub struct NormalizerBuilder {
    sink: Arc<dyn DiagnosticSink>,
    exceptions: Arc<dyn ExceptionChannel>,
    logs: Arc<dyn LogEventChannel>,
    dispatch: DispatchMode,
    forward_timeout: Duration,
    exclude_header_prefixes: Vec<String>,
    log_forwarding_enabled: bool,
}

impl Default for NormalizerBuilder {
    fn default() -> Self {
        let defaults = TelemetryConfig::default();
        Self {
            sink: Arc::new(TracingSink),
            exceptions: Arc::new(NoopCollector),
            logs: Arc::new(NoopCollector),
            dispatch: defaults.dispatch,
            forward_timeout: defaults.forward_timeout(),
            exclude_header_prefixes: defaults.exclude_header_prefixes,
            log_forwarding_enabled: defaults.log_forwarding_enabled,
        }
    }
}

impl NormalizerBuilder {
    /// Applies dispatch, timeout and capture options from `config`
    pub fn config(mut self, config: &TelemetryConfig) -> Self {
        self.dispatch = config.dispatch;
        self.forward_timeout = config.forward_timeout();
        self.exclude_header_prefixes = config.exclude_header_prefixes.clone();
        self.log_forwarding_enabled = config.enabled && config.log_forwarding_enabled;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn exception_channel(mut self, channel: Arc<dyn ExceptionChannel>) -> Self {
        self.exceptions = channel;
        self
    }

    pub fn log_channel(mut self, channel: Arc<dyn LogEventChannel>) -> Self {
        self.logs = channel;
        self
    }

    /// Uses one collector for both channels
    pub fn collector<C>(self, collector: Arc<C>) -> Self
    where
        C: ExceptionChannel + LogEventChannel + 'static,
    {
        let logs: Arc<dyn LogEventChannel> = collector.clone();
        self.exception_channel(collector).log_channel(logs)
    }

    pub fn dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub fn build(self) -> Normalizer {
        Normalizer {
            sink: self.sink,
            exceptions: self.exceptions,
            logs: self.logs,
            dispatch: self.dispatch,
            forward_timeout: self.forward_timeout,
            exclude_header_prefixes: self.exclude_header_prefixes,
            log_forwarding_enabled: self.log_forwarding_enabled,
        }
    }
}
