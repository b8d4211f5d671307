//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use opentelemetry_sdk::trace::SdkTracer;

use crate::telemetry::{logger::Logger, metrics::Metrics};

/// Application state shared across all request handlers.
///
/// All fields are cheaply cloneable so Axum can clone the state per request.
#[derive(Clone)]
pub struct AppState {
    pub logger: Logger,
    pub metrics: Metrics,
    /// Absent when tracing is disabled; the middleware then records metrics
    /// only.
    pub tracer: Option<SdkTracer>,
    pub data_dir: Arc<str>,
    pub log_dir: Arc<str>,
}

impl AppState {
    pub fn new(
        logger: Logger,
        metrics: Metrics,
        tracer: Option<SdkTracer>,
        data_dir: &str,
        log_dir: &str,
    ) -> Self {
        Self {
            logger: logger.named("http"),
            metrics,
            tracer,
            data_dir: Arc::from(data_dir),
            log_dir: Arc::from(log_dir),
        }
    }
}
