//! Request tracking middleware.
//!
//! [`track`] wraps every routed request: it always records the request
//! counter and latency histogram, and opens a server span when a tracer is
//! configured. The response body is passed through untouched. A request
//! that asks for a connection upgrade the connection cannot provide is
//! answered with a 400 before it reaches the handler.

use std::time::Duration;

use axum::{
    extract::{MatchedPath, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use hyper::upgrade::OnUpgrade;
use opentelemetry::{
    trace::{FutureExt as _, SpanKind, Status, TraceContextExt as _, Tracer as _},
    Context, KeyValue,
};
use thiserror::Error;

use super::{handlers, state::AppState};
use crate::telemetry::metrics::Timer;

/// Default per-request timeout applied to all routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A capability the underlying connection does not offer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("connection upgrade not supported")]
    NotSupported,
}

/// The connection-upgrade handle the server attached to `req`, if any.
///
/// # Errors
///
/// [`CapabilityError::NotSupported`] when the request carries no upgrade
/// handle, e.g. over HTTP/2 or under `oneshot`.
pub fn upgrade_handle(req: &Request) -> Result<&OnUpgrade, CapabilityError> {
    req.extensions()
        .get::<OnUpgrade>()
        .ok_or(CapabilityError::NotSupported)
}

/// Record metrics and, with a tracer, a span for one request.
///
/// The endpoint label is the matched route template so path parameters do
/// not explode label cardinality.
pub async fn track(
    State(state): State<AppState>,
    matched: Option<MatchedPath>,
    req: Request,
    next: Next,
) -> Response {
    let timer = Timer::start();
    let method = req.method().clone();
    let endpoint = matched
        .as_ref()
        .map_or_else(|| req.uri().path().to_owned(), |m| m.as_str().to_owned());

    let cx = state.tracer.as_ref().map(|tracer| {
        let span = tracer
            .span_builder(format!("HTTP {method} {endpoint}"))
            .with_kind(SpanKind::Server)
            .start(tracer);
        Context::current_with_span(span)
    });

    let unsupported = if req.headers().contains_key(header::UPGRADE) {
        upgrade_handle(&req).err()
    } else {
        None
    };
    let run = async {
        match &unsupported {
            Some(err) => handlers::not_supported(&state, err),
            None => next.run(req).await,
        }
    };
    let response = match &cx {
        Some(cx) => run.with_context(cx.clone()).await,
        None => run.await,
    };
    let status = response.status();

    state
        .metrics
        .record_http_request(method.as_str(), &endpoint, status.as_u16(), timer.elapsed());

    if let Some(cx) = cx {
        let span = cx.span();
        span.set_attributes([
            KeyValue::new("http.method", method.to_string()),
            KeyValue::new("http.route", endpoint),
            KeyValue::new("http.status_code", i64::from(status.as_u16())),
        ]);
        if status.as_u16() >= 400 {
            span.set_status(Status::error(status.canonical_reason().unwrap_or_default()));
        }
        span.end();
    }

    response
}
