//! Telemetry: dual-sink logging, Prometheus + OTLP metrics, request traces.
//!
//! [`Telemetry::init`] builds every handle once at startup. Handles are passed
//! explicitly to whoever needs them; only the logger is also installed as the
//! global `tracing` dispatcher (by `main`).
//!
//! # Telemetry invariants
//!
//! - Remote exporters never block request handling: metrics and spans export
//!   from SDK threads, structured logs go through a bounded queue.
//! - Exporter failures after startup are never fatal.

pub mod adapter;
pub mod logger;
pub mod metrics;
pub mod resource;
pub mod shutdown;
pub mod tls;
pub mod traces;
pub mod transport;

use std::sync::Arc;

use anyhow::{Context, Result};
use opentelemetry::{logs::LoggerProvider as _, trace::TracerProvider as _};
use opentelemetry_sdk::{logs::SdkLoggerProvider, trace::SdkTracer};

use crate::config::{Config, Protocol, TelemetryConfig};
use adapter::{LogAdapter, OtlpLogSink, StructuredSink};
use logger::Logger;
use metrics::Metrics;
use resource::{service_resource, SERVICE};
use shutdown::ShutdownCoordinator;
use transport::ExportTarget;

/// Every telemetry handle of the process.
pub struct Telemetry {
    pub logger: Logger,
    pub metrics: Metrics,
    /// `None` when tracing is disabled.
    pub tracer: Option<SdkTracer>,
    pub shutdown: ShutdownCoordinator,
}

impl Telemetry {
    /// Initialise metrics, remote log export, the logger and traces, in that
    /// order. Must run inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal: unreadable TLS files, an exporter that
    /// cannot be built, or an unopenable log file.
    pub fn init(cfg: &Config) -> Result<Self> {
        let telemetry = cfg.telemetry.as_ref();

        let metrics = Metrics::init(telemetry).context("failed to initialise metrics")?;

        let log_provider = telemetry
            .map(log_provider)
            .transpose()
            .context("failed to initialise log export")?
            .flatten();
        let structured = log_provider.as_ref().map(|provider| {
            let sink = OtlpLogSink::new(provider.logger(SERVICE));
            StructuredSink::spawn(Arc::new(LogAdapter::new(sink)))
        });

        let logger = Logger::init(&cfg.log_dir, &cfg.log_level, structured.clone())
            .context("failed to initialise logger")?;

        let tracer_provider = telemetry
            .map(traces::init)
            .transpose()
            .context("failed to initialise tracing")?
            .flatten();
        let tracer = tracer_provider
            .as_ref()
            .map(|provider| provider.tracer(SERVICE));

        let mut shutdown = ShutdownCoordinator::new()
            .with_logger(logger.named("telemetry"))
            .with_meter_provider(metrics.provider().clone());
        if let Some(sink) = structured {
            shutdown = shutdown.with_structured_sink(sink);
        }
        if let Some(provider) = log_provider {
            shutdown = shutdown.with_logger_provider(provider);
        }
        if let Some(provider) = tracer_provider {
            shutdown = shutdown.with_tracer_provider(provider);
        }

        Ok(Self {
            logger,
            metrics,
            tracer,
            shutdown,
        })
    }
}

/// OTLP logger provider, or `None` when log export is disabled.
fn log_provider(telemetry: &TelemetryConfig) -> Result<Option<SdkLoggerProvider>> {
    let Some(signal) = telemetry.logs_enabled() else {
        return Ok(None);
    };

    let target = ExportTarget::new(telemetry, &signal.endpoint);
    let exporter = match signal.protocol {
        Protocol::Grpc => transport::tonic(
            opentelemetry_otlp::LogExporter::builder().with_tonic(),
            &target,
        )?
        .build(),
        Protocol::Http => transport::http(
            opentelemetry_otlp::LogExporter::builder().with_http(),
            &target,
            "/v1/logs",
        )?
        .build(),
    }
    .context("failed to create OTLP log exporter")?;

    Ok(Some(
        SdkLoggerProvider::builder()
            .with_resource(service_resource())
            .with_batch_exporter(exporter)
            .build(),
    ))
}
