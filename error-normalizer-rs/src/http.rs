//! # Axum Integration
//!
//! Handlers return [`Failure`] (or anything convertible into it) as their
//! error type. The failure is parked in the response extensions and picked
//! up by [`normalize_failures`], which runs the [`Normalizer`] with the
//! request context captured before the handler ran.
//!
//! ```ignore
//! let app = error_normalizer::http::install(router, Arc::new(normalizer));
//! ```

use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use tower_http::catch_panic::CatchPanicLayer;

use crate::context::RequestContext;
use crate::normalizer::{NormalizedResponse, Normalizer};
use crate::types::{Failure, HttpFailure, UnclassifiedFailure};

/// A failure waiting to be normalized, carried in response extensions
#[derive(Clone)]
pub struct CaughtFailure(pub Arc<Failure>);

impl RequestContext {
    /// Snapshot of an HTTP request's identity
    pub fn from_http(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());

        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
            .fold(RequestContext::new(method.as_str(), url), |ctx, (name, value)| {
                ctx.header(name, value)
            })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestContext::from_http(&parts.method, &parts.uri, &parts.headers))
    }
}

impl IntoResponse for NormalizedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body.into_value())).into_response()
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response.extensions_mut().insert(CaughtFailure(Arc::new(self)));
        response
    }
}

impl IntoResponse for HttpFailure {
    fn into_response(self) -> Response {
        Failure::from(self).into_response()
    }
}

/// Middleware replacing responses that carry a [`CaughtFailure`]
pub async fn normalize_failures(
    State(normalizer): State<Arc<Normalizer>>,
    request: Request,
    next: Next,
) -> Response {
    let context = RequestContext::from_http(request.method(), request.uri(), request.headers());

    let mut response = next.run(request).await;
    match response.extensions_mut().remove::<CaughtFailure>() {
        Some(CaughtFailure(failure)) => normalizer.handle(failure, &context).await.into_response(),
        None => response,
    }
}

/// Converts a handler panic into an unclassified failure
pub fn panic_to_failure(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    Failure::from(UnclassifiedFailure::msg(format!("handler panicked: {}", detail))).into_response()
}

/// Fallback for unmatched routes, shaped like any other not-found failure
pub async fn route_not_found(method: Method, uri: Uri) -> Failure {
    HttpFailure::not_found(format!("Cannot {} {}", method, uri.path())).into()
}

/// Fallback for known paths hit with an unsupported method.
///
/// Register it with `Router::method_not_allowed_fallback` after every route.
pub async fn method_not_allowed(method: Method, uri: Uri) -> Failure {
    HttpFailure::standard(405, format!("Cannot {} {}", method, uri.path())).into()
}

/// Wraps `router` so every failure and panic is normalized
pub fn install<S>(router: Router<S>, normalizer: Arc<Normalizer>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::custom(panic_to_failure))
        .layer(middleware::from_fn_with_state(normalizer, normalize_failures))
}
