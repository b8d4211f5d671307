//! Bounded teardown of every telemetry sink.
//!
//! Each sink gets the same budget. Failures and timeouts are logged and
//! reported per sink; none of them aborts the others.
//!
//! The structured queue closes first, so lines logged after it drains reach
//! the human sink only and count as dropped on the structured one.

use std::{fmt, sync::Mutex, time::Duration};

use opentelemetry_sdk::{
    error::OTelSdkResult, logs::SdkLoggerProvider, metrics::SdkMeterProvider,
    trace::SdkTracerProvider,
};

use super::{adapter::StructuredSink, logger::Logger};

/// Default per-sink budget used by `main`.
pub const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

/// How one sink's shutdown went.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SinkOutcome {
    /// Never initialised, or already shut down.
    #[default]
    Skipped,
    Completed,
    Failed(String),
    TimedOut,
}

impl fmt::Display for SinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkOutcome::Skipped => f.write_str("skipped"),
            SinkOutcome::Completed => f.write_str("completed"),
            SinkOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            SinkOutcome::TimedOut => f.write_str("timed out"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub structured_logs: SinkOutcome,
    pub logs: SinkOutcome,
    pub traces: SinkOutcome,
    pub metrics: SinkOutcome,
}

#[derive(Default)]
struct Sinks {
    structured: Option<StructuredSink>,
    logs: Option<SdkLoggerProvider>,
    traces: Option<SdkTracerProvider>,
    metrics: Option<SdkMeterProvider>,
}

/// Owns the shutdown handles of whatever sinks were initialised.
pub struct ShutdownCoordinator {
    logger: Option<Logger>,
    sinks: Mutex<Sinks>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            logger: None,
            sinks: Mutex::new(Sinks::default()),
        }
    }

    /// Where per-sink outcomes are reported.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_structured_sink(self, sink: StructuredSink) -> Self {
        self.lock().structured = Some(sink);
        self
    }

    pub fn with_logger_provider(self, provider: SdkLoggerProvider) -> Self {
        self.lock().logs = Some(provider);
        self
    }

    pub fn with_tracer_provider(self, provider: SdkTracerProvider) -> Self {
        self.lock().traces = Some(provider);
        self
    }

    pub fn with_meter_provider(self, provider: SdkMeterProvider) -> Self {
        self.lock().metrics = Some(provider);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sinks> {
        self.sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Flush and close every sink, each within `budget`.
    ///
    /// The structured queue drains first so its records reach the log
    /// provider before that shuts down. Calling this again is a no-op.
    pub async fn shutdown(&self, budget: Duration) -> ShutdownReport {
        let sinks = std::mem::take(&mut *self.lock());
        let mut report = ShutdownReport::default();

        if let Some(sink) = sinks.structured {
            self.info(format_args!("shutting down telemetry sinks"));
            report.structured_logs = match sink.flush(budget).await {
                Ok(()) => SinkOutcome::Completed,
                Err(_) => SinkOutcome::TimedOut,
            };
            self.info(format_args!(
                "structured log sink: emitted={} dropped={}",
                sink.adapter().emitted(),
                sink.dropped()
            ));
        }
        if let Some(provider) = sinks.logs {
            report.logs = bounded(budget, move || provider.shutdown()).await;
        }
        if let Some(provider) = sinks.traces {
            report.traces = bounded(budget, move || provider.shutdown()).await;
        }
        if let Some(provider) = sinks.metrics {
            report.metrics = bounded(budget, move || provider.shutdown()).await;
        }

        for (name, outcome) in [
            ("structured logs", &report.structured_logs),
            ("log exporter", &report.logs),
            ("trace exporter", &report.traces),
            ("metric exporter", &report.metrics),
        ] {
            match outcome {
                SinkOutcome::Skipped => {}
                SinkOutcome::Completed => self.info(format_args!("{name} shut down")),
                other => self.error(format_args!("{name} shutdown {other}")),
            }
        }
        report
    }

    fn info(&self, message: fmt::Arguments<'_>) {
        if let Some(logger) = &self.logger {
            logger.info(message);
        }
    }

    fn error(&self, message: fmt::Arguments<'_>) {
        if let Some(logger) = &self.logger {
            logger.error(message);
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Provider shutdowns block on their export threads, so they run on the
/// blocking pool. A timed-out shutdown is abandoned, not cancelled.
async fn bounded<F>(budget: Duration, shutdown: F) -> SinkOutcome
where
    F: FnOnce() -> OTelSdkResult + Send + 'static,
{
    match tokio::time::timeout(budget, tokio::task::spawn_blocking(shutdown)).await {
        Ok(Ok(Ok(()))) => SinkOutcome::Completed,
        Ok(Ok(Err(err))) => SinkOutcome::Failed(err.to_string()),
        Ok(Err(join)) => SinkOutcome::Failed(join.to_string()),
        Err(_) => SinkOutcome::TimedOut,
    }
}
