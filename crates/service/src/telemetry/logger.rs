//! Dual-sink logger.
//!
//! A [`Logger`] owns a `tracing` [`Dispatch`] with up to two layers:
//!
//! - a human-readable layer that always writes to stdout and to
//!   `<log_dir>/service-seed.log` (create-or-append);
//! - a JSON layer writing one `@`-keyed object per line into a
//!   [`StructuredSink`], present only when remote log export is configured.
//!
//! Layers run in registration order, so within one call the human write
//! always happens before the structured one. `main` also installs the
//! dispatch globally so plain `tracing` macros reach the same sinks.

use std::{
    fmt,
    fs::OpenOptions,
    panic::Location,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{
    field::{Field, Visit},
    level_filters::LevelFilter,
    Dispatch, Event, Level, Subscriber,
};
use tracing_subscriber::{
    filter::filter_fn,
    fmt::{format::Writer, writer::MakeWriterExt, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    EnvFilter, Layer,
};

use super::adapter::StructuredSink;

/// Fixed log file name inside the configured log directory.
pub const LOG_FILE_NAME: &str = "service-seed.log";

/// Name of the root logger; [`Logger::named`] appends `.<name>` segments.
pub const ROOT_LOGGER: &str = "SERVICE-SEED";

/// Event field carrying the hierarchical logger name.
const MODULE_FIELD: &str = "module";
/// Event field carrying the call site of a [`Logger`] method.
const CALLER_FIELD: &str = "caller";
/// Event field carrying the JSON-encoded extra fields of a `*_with` call.
const FIELDS_FIELD: &str = "fields";

/// Diagnostics of the export pipeline itself stay out of the structured
/// sink, otherwise a failing exporter would feed its own errors back to it.
fn is_exporter_internal(target: &str) -> bool {
    ["opentelemetry", "tonic", "h2", "hyper", "reqwest"]
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

/// Map a configured level name to a filtering threshold.
///
/// `fatal` filters like `error`; anything unrecognised means `info`.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.trim().to_ascii_lowercase().as_str() {
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" | "fatal" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Most verbose level `filter` can admit, falling back to `configured`.
fn effective_threshold(filter: &EnvFilter, configured: LevelFilter) -> LevelFilter {
    filter.max_level_hint().unwrap_or(configured)
}

struct Shared {
    dispatch: Dispatch,
    threshold: LevelFilter,
    structured: Option<StructuredSink>,
    file_path: PathBuf,
    closed: AtomicBool,
}

/// Handle to the process logger. Cheap to clone; clones and
/// [`named`](Logger::named) children share the same destinations.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
    name: Arc<str>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("threshold", &self.shared.threshold)
            .field("structured", &self.shared.structured.is_some())
            .finish()
    }
}

impl Logger {
    /// Open the log file and build the sinks.
    ///
    /// `RUST_LOG`, when set, overrides `level` for filtering.
    ///
    /// # Errors
    ///
    /// Returns an error if `<log_dir>/service-seed.log` cannot be opened.
    pub fn init(
        log_dir: impl AsRef<Path>,
        level: &str,
        structured: Option<StructuredSink>,
    ) -> Result<Self> {
        let file_path = log_dir.as_ref().join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .with_context(|| format!("failed to open log file at path {}", file_path.display()))?;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(parse_level(level).to_string()));
        let threshold = effective_threshold(&filter, parse_level(level));

        let human = tracing_subscriber::fmt::layer()
            .event_format(HumanFormat)
            .with_writer(std::io::stdout.and(Arc::new(file)));

        let json = structured.clone().map(|sink| {
            tracing_subscriber::fmt::layer()
                .event_format(StructuredFormat)
                .with_writer(sink)
                .with_filter(filter_fn(|meta| !is_exporter_internal(meta.target())))
        });

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(human)
            .with(json);

        Ok(Self {
            shared: Arc::new(Shared {
                dispatch: Dispatch::new(subscriber),
                threshold,
                structured,
                file_path,
                closed: AtomicBool::new(false),
            }),
            name: Arc::from(ROOT_LOGGER),
        })
    }

    /// Make this logger the process-wide `tracing` default.
    ///
    /// # Errors
    ///
    /// Returns an error if a global default is already installed.
    pub fn install_global(&self) -> Result<()> {
        tracing::dispatcher::set_global_default(self.shared.dispatch.clone())
            .context("failed to install global log dispatcher")
    }

    /// A child logger named `<parent>.<name>` writing to the same sinks.
    pub fn named(&self, name: &str) -> Logger {
        Logger {
            shared: Arc::clone(&self.shared),
            name: Arc::from(format!("{}.{}", self.name, name)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_path(&self) -> &Path {
        &self.shared.file_path
    }

    pub fn has_structured_sink(&self) -> bool {
        self.shared.structured.is_some()
    }

    /// Whether the active filter's most verbose directive admits `level`.
    /// That is `RUST_LOG` when set and the configured level otherwise.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.shared.threshold
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop logging through every handle sharing these sinks.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    #[track_caller]
    pub fn debug(&self, message: impl fmt::Display) {
        self.emit(Level::DEBUG, &message, &[], Location::caller());
    }

    #[track_caller]
    pub fn info(&self, message: impl fmt::Display) {
        self.emit(Level::INFO, &message, &[], Location::caller());
    }

    #[track_caller]
    pub fn warn(&self, message: impl fmt::Display) {
        self.emit(Level::WARN, &message, &[], Location::caller());
    }

    #[track_caller]
    pub fn error(&self, message: impl fmt::Display) {
        self.emit(Level::ERROR, &message, &[], Location::caller());
    }

    #[track_caller]
    pub fn debug_with(&self, message: impl fmt::Display, fields: &[(&str, Value)]) {
        self.emit(Level::DEBUG, &message, fields, Location::caller());
    }

    #[track_caller]
    pub fn info_with(&self, message: impl fmt::Display, fields: &[(&str, Value)]) {
        self.emit(Level::INFO, &message, fields, Location::caller());
    }

    #[track_caller]
    pub fn warn_with(&self, message: impl fmt::Display, fields: &[(&str, Value)]) {
        self.emit(Level::WARN, &message, fields, Location::caller());
    }

    #[track_caller]
    pub fn error_with(&self, message: impl fmt::Display, fields: &[(&str, Value)]) {
        self.emit(Level::ERROR, &message, fields, Location::caller());
    }

    /// Log at error severity with a `FATAL: ` prefix. Terminating the process
    /// is left to the caller.
    #[track_caller]
    pub fn fatal(&self, message: impl fmt::Display) {
        self.emit(
            Level::ERROR,
            &format_args!("FATAL: {message}"),
            &[],
            Location::caller(),
        );
    }

    fn emit(
        &self,
        level: Level,
        message: &dyn fmt::Display,
        fields: &[(&str, Value)],
        caller: &Location<'_>,
    ) {
        if self.is_closed() || !self.enabled(level) {
            return;
        }
        let module = self.name();
        let extra = (!fields.is_empty()).then(|| {
            let map: Map<String, Value> = fields
                .iter()
                .map(|(key, value)| ((*key).to_owned(), value.clone()))
                .collect();
            Value::Object(map).to_string()
        });
        let fields = extra.as_deref();
        tracing::dispatcher::with_default(&self.shared.dispatch, || match level {
            Level::ERROR => tracing::error!(module, caller = %caller, fields, "{message}"),
            Level::WARN => tracing::warn!(module, caller = %caller, fields, "{message}"),
            Level::INFO => tracing::info!(module, caller = %caller, fields, "{message}"),
            Level::DEBUG => tracing::debug!(module, caller = %caller, fields, "{message}"),
            _ => tracing::trace!(module, caller = %caller, fields, "{message}"),
        });
    }
}

// ---------------------------------------------------------------------------
// Event formatting
// ---------------------------------------------------------------------------

/// Fields of one event, with the logger name and caller split out.
#[derive(Default)]
struct EventFields {
    message: String,
    module: Option<String>,
    caller: Option<String>,
    extra: Vec<(String, Value)>,
}

impl EventFields {
    fn collect(event: &Event<'_>) -> Self {
        let mut fields = Self::default();
        event.record(&mut fields);
        fields
    }

    fn insert(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.message = into_text(value),
            MODULE_FIELD => self.module = Some(into_text(value)),
            CALLER_FIELD => self.caller = Some(into_text(value)),
            FIELDS_FIELD => {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&into_text(value)) {
                    self.extra.extend(map);
                }
            }
            name => self.extra.push((name.to_owned(), value)),
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }
}

fn into_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn module_of(fields: &EventFields, event: &Event<'_>) -> String {
    fields
        .module
        .clone()
        .unwrap_or_else(|| event.metadata().target().to_owned())
}

fn caller_of(fields: &EventFields, event: &Event<'_>) -> Option<String> {
    let meta = event.metadata();
    fields.caller.clone().or_else(|| match (meta.file(), meta.line()) {
        (Some(file), Some(line)) => Some(format!("{file}:{line}")),
        (Some(file), None) => Some(file.to_owned()),
        _ => None,
    })
}

/// `2024-01-01T00:00:00.000Z [INFO]  SERVICE-SEED.worker: message: key=value`
struct HumanFormat;

impl<S, N> FormatEvent<S, N> for HumanFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let fields = EventFields::collect(event);
        let level = format!("[{}]", event.metadata().level());
        write!(
            writer,
            "{} {:<7} {}: {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            module_of(&fields, event),
            fields.message,
        )?;
        for (i, (key, value)) in fields.extra.iter().enumerate() {
            let sep = if i == 0 { ":" } else { "" };
            write!(writer, "{sep} {key}={value}")?;
        }
        writeln!(writer)
    }
}

/// One JSON object per line with `@timestamp`, `@level`, `@message`,
/// `@module`, `@caller` and every other event field at the top level.
struct StructuredFormat;

impl<S, N> FormatEvent<S, N> for StructuredFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let fields = EventFields::collect(event);
        let mut entry = Map::new();
        entry.insert(
            "@timestamp".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        entry.insert(
            "@level".into(),
            Value::String(event.metadata().level().as_str().to_ascii_lowercase()),
        );
        entry.insert("@module".into(), Value::String(module_of(&fields, event)));
        if let Some(caller) = caller_of(&fields, event) {
            entry.insert("@caller".into(), Value::String(caller));
        }
        for (key, value) in &fields.extra {
            entry.insert(key.clone(), value.clone());
        }
        entry.insert("@message".into(), Value::String(fields.message));
        writeln!(writer, "{}", Value::Object(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_log(logger: &Logger) -> String {
        fs::read_to_string(logger.file_path()).unwrap()
    }

    #[test]
    fn level_names_map_to_thresholds() {
        assert_eq!(parse_level("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_level("INFO"), LevelFilter::INFO);
        assert_eq!(parse_level("Warn"), LevelFilter::WARN);
        assert_eq!(parse_level("error"), LevelFilter::ERROR);
        assert_eq!(parse_level("fatal"), LevelFilter::ERROR);
        assert_eq!(parse_level("verbose"), LevelFilter::INFO);
        assert_eq!(parse_level(""), LevelFilter::INFO);
    }

    #[test]
    fn threshold_admits_levels_at_or_above() {
        let dir = tempfile::tempdir().unwrap();
        let ordered = [Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR];
        for (idx, name) in ["debug", "info", "warn", "error"].iter().enumerate() {
            let logger = Logger::init(dir.path(), name, None).unwrap();
            for (lvl_idx, level) in ordered.iter().enumerate() {
                assert_eq!(
                    logger.enabled(*level),
                    lvl_idx >= idx,
                    "threshold {name}, level {level}"
                );
            }
        }
    }

    #[test]
    fn env_directives_override_configured_threshold() {
        let narrowed = effective_threshold(&EnvFilter::new("warn"), LevelFilter::DEBUG);
        assert_eq!(narrowed, LevelFilter::WARN);

        let widened = effective_threshold(&EnvFilter::new("info,hyper=trace"), LevelFilter::ERROR);
        assert_eq!(widened, LevelFilter::TRACE);
    }

    #[test]
    fn writes_human_lines_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::init(dir.path(), "info", None).unwrap();
        logger.info("service started");
        logger.debug("hidden detail");

        let contents = read_log(&logger);
        assert!(contents.contains("[INFO]"));
        assert!(contents.contains("SERVICE-SEED: service started"));
        assert!(!contents.contains("hidden detail"));
    }

    #[test]
    fn log_file_is_appended_across_inits() {
        let dir = tempfile::tempdir().unwrap();
        Logger::init(dir.path(), "info", None).unwrap().info("first run");
        let logger = Logger::init(dir.path(), "info", None).unwrap();
        logger.info("second run");

        let contents = read_log(&logger);
        assert!(contents.contains("first run"));
        assert!(contents.contains("second run"));
    }

    #[test]
    fn named_logger_shares_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let parent = Logger::init(dir.path(), "info", None).unwrap();
        let child = parent.named("worker");

        assert_eq!(child.name(), "SERVICE-SEED.worker");
        assert_eq!(child.file_path(), parent.file_path());
        assert!(!child.has_structured_sink());

        child.warn("queue is full");
        assert!(read_log(&parent).contains("SERVICE-SEED.worker: queue is full"));
    }

    #[test]
    fn extra_fields_reach_the_human_line() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::init(dir.path(), "info", None).unwrap();
        logger.info_with(
            "listening",
            &[("port", Value::from(8080)), ("address", Value::from("0.0.0.0"))],
        );

        let contents = read_log(&logger);
        assert!(contents.contains(r#"SERVICE-SEED: listening: address="0.0.0.0" port=8080"#));
    }

    #[test]
    fn names_nest() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::init(dir.path(), "info", None).unwrap();
        assert_eq!(logger.named("api").named("v1").name(), "SERVICE-SEED.api.v1");
    }

    #[test]
    fn fatal_logs_with_prefix_and_returns() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::init(dir.path(), "fatal", None).unwrap();
        logger.error("plain error");
        logger.fatal("cannot continue");
        logger.warn("not shown");

        let contents = read_log(&logger);
        assert!(contents.contains("[ERROR]"));
        assert!(contents.contains("FATAL: cannot continue"));
        assert!(contents.contains("plain error"));
        assert!(!contents.contains("not shown"));
    }

    #[test]
    fn closed_logger_ignores_calls() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::init(dir.path(), "info", None).unwrap();
        let child = logger.named("worker");
        logger.close();
        child.info("after close");

        assert!(child.is_closed());
        assert!(!read_log(&logger).contains("after close"));
    }

    #[test]
    fn exporter_targets_are_kept_out_of_structured_sink() {
        assert!(is_exporter_internal("opentelemetry_sdk::logs"));
        assert!(is_exporter_internal("h2::codec"));
        assert!(!is_exporter_internal("service_seed::server"));
    }

    #[test]
    fn init_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(Logger::init(&missing, "info", None).is_err());
    }
}
