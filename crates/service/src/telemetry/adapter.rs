//! Structured log lines → canonical [`LogRecord`]s → remote log sink.
//!
//! The JSON layer of the [`Logger`](super::logger::Logger) writes into a
//! [`StructuredSink`]: a bounded queue drained by a background task that
//! hands each line to the [`LogAdapter`]. A full queue drops the line instead
//! of blocking the caller. The adapter parses each line, lifts the well-known
//! `@` keys into record fields and emits the record to a [`LogSink`]
//! (in production, the OTLP logger).

use std::{
    collections::BTreeMap,
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime},
};

use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _};
use opentelemetry_sdk::logs::SdkLogger;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing_subscriber::fmt::MakeWriter;

/// Lines buffered between the logger and the adapter.
pub const QUEUE_CAPACITY: usize = 4096;

/// Attribute carrying the hierarchical logger name.
pub const LOGGER_NAME_ATTR: &str = "logger.name";
/// Attribute carrying the `file:line` call site.
pub const CODE_FILEPATH_ATTR: &str = "code.filepath";

// ---------------------------------------------------------------------------
// Canonical record
// ---------------------------------------------------------------------------

/// Ordered log severity: `Trace < Debug < Info < Warn < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Case-insensitive level name lookup; anything unknown is `Info`.
    pub fn from_level(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "trace" => Severity::Trace,
            "debug" => Severity::Debug,
            "info" => Severity::Info,
            "warn" | "warning" => Severity::Warn,
            "error" => Severity::Error,
            "fatal" => Severity::Fatal,
            _ => Severity::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    fn to_otel(self) -> opentelemetry::logs::Severity {
        use opentelemetry::logs::Severity as Otel;
        match self {
            Severity::Trace => Otel::Trace,
            Severity::Debug => Otel::Debug,
            Severity::Info => Otel::Info,
            Severity::Warn => Otel::Warn,
            Severity::Error => Otel::Error,
            Severity::Fatal => Otel::Fatal,
        }
    }
}

/// One log entry in exporter-ready form.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: SystemTime,
    pub severity: Severity,
    pub body: String,
    /// Every attribute, including [`LOGGER_NAME_ATTR`] and
    /// [`CODE_FILEPATH_ATTR`] when the line carried them.
    pub attributes: BTreeMap<String, String>,
}

#[cfg(test)]
impl LogRecord {
    pub fn logger_name(&self) -> Option<&str> {
        self.attributes.get(LOGGER_NAME_ATTR).map(String::as_str)
    }

    pub fn source(&self) -> Option<&str> {
        self.attributes.get(CODE_FILEPATH_ATTR).map(String::as_str)
    }
}

/// Parse one structured line. Returns `None` for anything that is not a JSON
/// object.
pub fn parse_line(line: &str) -> Option<LogRecord> {
    let mut entry: Map<String, Value> = match serde_json::from_str(line) {
        Ok(Value::Object(map)) => map,
        _ => return None,
    };

    let timestamp = entry
        .remove("@timestamp")
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(SystemTime::from)
        .unwrap_or_else(SystemTime::now);

    let severity = entry
        .remove("@level")
        .as_ref()
        .and_then(Value::as_str)
        .map(Severity::from_level)
        .unwrap_or(Severity::Info);

    let body = entry.remove("@message").map(stringify).unwrap_or_default();

    let mut attributes = BTreeMap::new();
    let provenance = [("@module", LOGGER_NAME_ATTR), ("@caller", CODE_FILEPATH_ATTR)];
    for (key, attr) in provenance {
        if let Some(value) = entry.remove(key).map(stringify).filter(|v| !v.is_empty()) {
            attributes.insert(attr.to_owned(), value);
        }
    }
    for (key, value) in entry {
        attributes.insert(key, stringify(value));
    }

    Some(LogRecord {
        timestamp,
        severity,
        body,
        attributes,
    })
}

/// Strings verbatim, everything else as its JSON text.
fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Remote sink
// ---------------------------------------------------------------------------

/// Destination for canonical records.
pub trait LogSink: Send + Sync + 'static {
    fn emit(&self, record: LogRecord);
}

/// Emits records through the OTLP logger provider's batch processor.
pub struct OtlpLogSink {
    logger: SdkLogger,
}

impl OtlpLogSink {
    pub fn new(logger: SdkLogger) -> Self {
        Self { logger }
    }
}

impl LogSink for OtlpLogSink {
    fn emit(&self, record: LogRecord) {
        let mut otel = self.logger.create_log_record();
        otel.set_timestamp(record.timestamp);
        otel.set_observed_timestamp(SystemTime::now());
        otel.set_severity_number(record.severity.to_otel());
        otel.set_severity_text(record.severity.as_str());
        otel.set_body(AnyValue::from(record.body));
        for (key, value) in record.attributes {
            otel.add_attribute(key, value);
        }
        self.logger.emit(otel);
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Turns buffers of newline-separated JSON entries into emitted records.
pub struct LogAdapter {
    sink: Box<dyn LogSink>,
    emitted: AtomicU64,
}

impl LogAdapter {
    pub fn new(sink: impl LogSink) -> Self {
        Self {
            sink: Box::new(sink),
            emitted: AtomicU64::new(0),
        }
    }

    /// Parse and emit every entry in `buf`. Blank and malformed lines are
    /// skipped. Always consumes the whole buffer.
    pub fn write(&self, buf: &[u8]) -> usize {
        for line in String::from_utf8_lossy(buf).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(record) = parse_line(line) {
                self.sink.emit(record);
                self.emitted.fetch_add(1, Ordering::Relaxed);
            }
        }
        buf.len()
    }

    /// Records handed to the sink so far.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Bounded structured sink
// ---------------------------------------------------------------------------

/// The structured sink could not be drained within its budget.
#[derive(Debug, Error)]
#[error("structured log queue not drained within {0:?}")]
pub struct FlushTimeout(pub Duration);

enum Command {
    Line(Vec<u8>),
    Close,
}

struct SinkState {
    tx: mpsc::Sender<Command>,
    adapter: Arc<LogAdapter>,
    closed: AtomicBool,
    dropped: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// `io::Write` end of the bounded queue in front of a [`LogAdapter`].
#[derive(Clone)]
pub struct StructuredSink {
    state: Arc<SinkState>,
}

impl StructuredSink {
    /// Start the drain task on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(adapter: Arc<LogAdapter>) -> Self {
        Self::with_capacity(adapter, QUEUE_CAPACITY)
    }

    pub fn with_capacity(adapter: Arc<LogAdapter>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(drain(rx, Arc::clone(&adapter)));
        Self {
            state: Arc::new(SinkState {
                tx,
                adapter,
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    pub fn adapter(&self) -> &LogAdapter {
        &self.state.adapter
    }

    /// Lines discarded because the queue was full or already closed.
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting lines and wait, at most `budget`, for the queued ones
    /// to reach the adapter. Later calls return immediately.
    pub async fn flush(&self, budget: Duration) -> Result<(), FlushTimeout> {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let worker = self
            .state
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let drained = async {
            let _ = self.state.tx.send(Command::Close).await;
            if let Some(worker) = worker {
                let _ = worker.await;
            }
        };
        tokio::time::timeout(budget, drained)
            .await
            .map_err(|_| FlushTimeout(budget))
    }
}

async fn drain(mut rx: mpsc::Receiver<Command>, adapter: Arc<LogAdapter>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Line(line) => {
                adapter.write(&line);
            }
            Command::Close => break,
        }
    }
}

impl io::Write for StructuredSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state.closed.load(Ordering::Acquire)
            || self.state.tx.try_send(Command::Line(buf.to_vec())).is_err()
        {
            self.state.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for StructuredSink {
    type Writer = StructuredSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
