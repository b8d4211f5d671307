//! Axum request handlers for all service endpoints.

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::{protocol::SystemStatusResponse, ServiceError};

use super::{middleware::CapabilityError, state::AppState};

/// Convert a [`ServiceError`] into its JSON error response.
fn error_response(err: &ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_response())).into_response()
}

/// Count and log a request with the wrong method.
fn method_not_allowed(state: &AppState, handler: &str) -> Response {
    state.logger.error(format_args!("{handler}: invalid request method"));
    state.metrics.record_error("http", "method_not_allowed");
    error_response(&ServiceError::MethodNotAllowed)
}

/// Count and log a request asking for a capability the connection lacks.
pub(super) fn not_supported(state: &AppState, err: &CapabilityError) -> Response {
    state.logger.warn(format_args!("rejecting request: {err}"));
    state.metrics.record_error("http", "capability_not_supported");
    error_response(&ServiceError::NotSupported(err.to_string()))
}

/// `/v1/health`: liveness check. Only `GET` is accepted.
pub async fn health(State(state): State<AppState>, method: Method) -> Response {
    if method != Method::GET {
        return method_not_allowed(&state, "health");
    }
    state.metrics.instruments().health_endpoint_hits.add(1, &[]);

    ([(header::CONTENT_TYPE, "text/plain")], "OK\n").into_response()
}

/// `/v1/system/status`: configured directories of a running service.
pub async fn system_status(State(state): State<AppState>, method: Method) -> Response {
    if method != Method::GET {
        return method_not_allowed(&state, "system status");
    }
    state
        .metrics
        .instruments()
        .system_status_endpoint_hits
        .add(1, &[]);

    let body = SystemStatusResponse::running(&*state.data_dir, &*state.log_dir);
    state.logger.info("system status request completed successfully");
    (StatusCode::OK, Json(body)).into_response()
}

/// `/v1/system/metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    state
        .metrics
        .instruments()
        .system_metrics_endpoint_hits
        .add(1, &[]);

    match state.metrics.render() {
        Ok(text) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response(),
        Err(e) => {
            state.logger.error(format_args!("failed to render metrics: {e:#}"));
            state.metrics.record_error("http", "metrics_render");
            error_response(&ServiceError::Internal("failed to render metrics".into()))
        }
    }
}

/// Catch-all 404 handler.
pub async fn not_found() -> Response {
    error_response(&ServiceError::NotFound(
        "the requested resource does not exist".into(),
    ))
}
