//! Tracer provider for request spans.

use anyhow::{Context, Result};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};

use super::{
    resource::service_resource,
    transport::{self, ExportTarget},
};
use crate::config::{Protocol, TelemetryConfig};

/// Build the OTLP tracer provider, or `None` when tracing is disabled.
///
/// # Errors
///
/// Fails if the span exporter cannot be built.
pub fn init(telemetry: &TelemetryConfig) -> Result<Option<SdkTracerProvider>> {
    let Some(signal) = telemetry.traces_enabled() else {
        return Ok(None);
    };

    let target = ExportTarget::new(telemetry, &signal.endpoint);
    let exporter = match signal.protocol {
        Protocol::Grpc => transport::tonic(
            opentelemetry_otlp::SpanExporter::builder().with_tonic(),
            &target,
        )?
        .build(),
        Protocol::Http => transport::http(
            opentelemetry_otlp::SpanExporter::builder().with_http(),
            &target,
            "/v1/traces",
        )?
        .build(),
    }
    .context("failed to create OTLP trace exporter")?;

    let provider = SdkTracerProvider::builder()
        .with_resource(service_resource())
        .with_sampler(sampler(signal.effective_sampling_rate()))
        .with_batch_exporter(exporter)
        .build();
    Ok(Some(provider))
}

/// Ratio sampling for rates strictly inside `(0, 1)`; everything else samples
/// every trace.
pub fn sampler(rate: f64) -> Sampler {
    if rate > 0.0 && rate < 1.0 {
        Sampler::TraceIdRatioBased(rate)
    } else {
        Sampler::AlwaysOn
    }
}
