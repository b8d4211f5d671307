//! Metrics registry.
//!
//! One [`SdkMeterProvider`] feeds two readers: a Prometheus pull exporter on a
//! private registry (always on, served at `/v1/system/metrics`) and, when
//! `telemetry.metrics.enabled`, a periodic OTLP push reader. On Linux the
//! private registry also carries the `process_*` runtime gauges.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use opentelemetry::{
    metrics::{Counter, Histogram, MeterProvider as _},
    KeyValue,
};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use prometheus::{Registry, TextEncoder};

use super::{
    resource::{service_resource, SERVICE},
    transport::{self, ExportTarget},
};
use crate::config::{Protocol, TelemetryConfig};

/// Histogram boundaries for request latency, in seconds.
pub const LATENCY_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Every instrument the service records.
pub struct Instruments {
    pub agent_errors: Counter<u64>,
    pub health_endpoint_hits: Counter<u64>,
    pub system_metrics_endpoint_hits: Counter<u64>,
    pub system_status_endpoint_hits: Counter<u64>,
    pub http_requests_total: Counter<u64>,
    pub http_request_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
}

impl Instruments {
    fn register(provider: &SdkMeterProvider) -> Self {
        let meter = provider.meter(SERVICE);
        let legacy = |name: &'static str, description: &'static str| {
            meter.u64_counter(name).with_description(description).build()
        };

        Self {
            agent_errors: legacy("agent_errors", "Number of errors encountered"),
            health_endpoint_hits: legacy("health_endpoint_hits", "Hits on the health endpoint"),
            system_metrics_endpoint_hits: legacy(
                "system_metrics_endpoint_hits",
                "Hits on the system metrics endpoint",
            ),
            system_status_endpoint_hits: legacy(
                "system_status_endpoint_hits",
                "Hits on the system status endpoint",
            ),
            http_requests_total: meter
                .u64_counter("service_http_requests_total")
                .with_description("Total number of HTTP requests")
                .with_unit("{request}")
                .build(),
            http_request_duration: meter
                .f64_histogram("service_http_request_duration_seconds")
                .with_description("HTTP request duration in seconds")
                .with_unit("s")
                .with_boundaries(LATENCY_BUCKETS.to_vec())
                .build(),
            errors_total: meter
                .u64_counter("service_errors_total")
                .with_description("Total number of errors by component and type")
                .with_unit("{error}")
                .build(),
        }
    }
}

/// Handle to the registry. Cheap to clone.
#[derive(Clone)]
pub struct Metrics {
    instruments: Arc<Instruments>,
    registry: Registry,
    provider: SdkMeterProvider,
    otlp: bool,
}

impl Metrics {
    /// Register every instrument with the pull exporter and, if configured,
    /// the OTLP push exporter.
    ///
    /// # Errors
    ///
    /// Fails if either exporter cannot be built, e.g. unreadable TLS files.
    pub fn init(telemetry: Option<&TelemetryConfig>) -> Result<Self> {
        let registry = Registry::new();
        #[cfg(target_os = "linux")]
        registry
            .register(Box::new(
                prometheus::process_collector::ProcessCollector::for_self(),
            ))
            .context("failed to register process collector")?;
        let prometheus = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .without_counter_suffixes()
            .without_units()
            .build()
            .context("failed to create Prometheus exporter")?;

        let mut builder = SdkMeterProvider::builder()
            .with_resource(service_resource())
            .with_reader(prometheus);

        let push = telemetry.and_then(|t| t.metrics_enabled().map(|m| (t, m)));
        let otlp = push.is_some();
        if let Some((telemetry, signal)) = push {
            let target = ExportTarget::new(telemetry, &signal.endpoint);
            let exporter = match signal.protocol {
                Protocol::Grpc => transport::tonic(
                    opentelemetry_otlp::MetricExporter::builder().with_tonic(),
                    &target,
                )?
                .build(),
                Protocol::Http => transport::http(
                    opentelemetry_otlp::MetricExporter::builder().with_http(),
                    &target,
                    "/v1/metrics",
                )?
                .build(),
            }
            .context("failed to create OTLP metric exporter")?;

            let reader = PeriodicReader::builder(exporter)
                .with_interval(Duration::from_secs(signal.interval_seconds))
                .build();
            builder = builder.with_reader(reader);
        }

        let provider = builder.build();
        Ok(Self {
            instruments: Arc::new(Instruments::register(&provider)),
            registry,
            provider,
            otlp,
        })
    }

    pub fn instruments(&self) -> &Instruments {
        &self.instruments
    }

    pub fn provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// Whether a push exporter is attached.
    pub fn exports_otlp(&self) -> bool {
        self.otlp
    }

    /// Count one completed request and observe its latency.
    pub fn record_http_request(&self, method: &str, endpoint: &str, status: u16, elapsed: Duration) {
        self.instruments.http_requests_total.add(
            1,
            &[
                KeyValue::new("method", method.to_owned()),
                KeyValue::new("endpoint", endpoint.to_owned()),
                KeyValue::new("status_code", status.to_string()),
            ],
        );
        self.instruments.http_request_duration.record(
            elapsed.as_secs_f64(),
            &[
                KeyValue::new("method", method.to_owned()),
                KeyValue::new("endpoint", endpoint.to_owned()),
            ],
        );
    }

    /// Count an error by component and type. Also bumps `agent_errors`.
    pub fn record_error(&self, component: &str, error_type: &str) {
        self.instruments.agent_errors.add(1, &[]);
        self.instruments.errors_total.add(
            1,
            &[
                KeyValue::new("component", component.to_owned()),
                KeyValue::new("error_type", error_type.to_owned()),
            ],
        );
    }

    /// Prometheus text exposition of the current values.
    ///
    /// # Errors
    ///
    /// Fails only if the encoder rejects the gathered families.
    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .context("failed to encode metrics")
    }
}

/// Measures one operation's duration.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record the elapsed seconds into `histogram`.
    #[cfg(test)]
    pub fn observe_duration(&self, histogram: &Histogram<f64>, attributes: &[KeyValue]) {
        histogram.record(self.elapsed().as_secs_f64(), attributes);
    }
}
