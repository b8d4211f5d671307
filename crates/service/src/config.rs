//! Configuration loading and validation for service-seed.
//!
//! Values come from an optional TOML file (path in `SS_CONFIG_FILE_PATH`)
//! overlaid by `SS_`-prefixed environment variables, nested with `__`
//! (e.g. `SS_TELEMETRY__METRICS__ENABLED=true`). The process exits with a
//! clear error message if the result is invalid.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "SS_CONFIG_FILE_PATH";

/// Configuration file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/service-seed/config.toml";

/// Export interval applied when `metrics.interval_seconds` is zero or unset.
pub const DEFAULT_EXPORT_INTERVAL_SECS: u64 = 60;

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding `service-seed.log`.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Directory for service data, created at startup.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Log level name (`debug`, `info`, `warn`, `error`, `fatal`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote telemetry export. Absent means logs, metrics and traces stay local.
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_server_address")]
    pub address: String,

    /// Bind port.
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            port: default_server_port(),
        }
    }
}

/// Shared OTLP settings plus per-signal overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Collector endpoint inherited by every signal that leaves its own empty.
    #[serde(default)]
    pub endpoint: String,

    /// Transport security shared by every exporter.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Extra request headers (e.g. API keys) sent with every export.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub metrics: Option<MetricsSignalConfig>,

    #[serde(default)]
    pub logs: Option<LogsSignalConfig>,

    #[serde(default)]
    pub traces: Option<TracesSignalConfig>,
}

/// OTLP wire transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Grpc,
    Http,
}

/// OTLP metrics export settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSignalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// Push interval; zero means [`DEFAULT_EXPORT_INTERVAL_SECS`].
    #[serde(default)]
    pub interval_seconds: u64,
}

/// OTLP logs export settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsSignalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub protocol: Protocol,
}

/// OTLP traces export settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TracesSignalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// Fraction of traces to sample. `0` or anything outside `(0, 1)` samples all.
    #[serde(default)]
    pub sampling_rate: f64,
}

impl TracesSignalConfig {
    /// Sampling rate after defaulting: always within `(0.0, 1.0]`.
    pub fn effective_sampling_rate(&self) -> f64 {
        if self.sampling_rate > 0.0 && self.sampling_rate < 1.0 {
            self.sampling_rate
        } else {
            1.0
        }
    }
}

/// TLS settings for OTLP export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Skip server certificate verification. Not for production.
    #[serde(default)]
    pub insecure: bool,

    /// PEM bundle of trusted roots for server verification.
    #[serde(default)]
    pub ca_file: String,

    /// PEM client certificate chain for mutual TLS.
    #[serde(default)]
    pub cert_file: String,

    /// PEM client private key for mutual TLS.
    #[serde(default)]
    pub key_file: String,
}

impl TlsConfig {
    pub fn ca_file(&self) -> Option<&Path> {
        non_empty(&self.ca_file).map(Path::new)
    }

    /// The client identity pair, if both halves are configured.
    pub fn client_identity(&self) -> Option<(&Path, &Path)> {
        match (non_empty(&self.cert_file), non_empty(&self.key_file)) {
            (Some(cert), Some(key)) => Some((Path::new(cert), Path::new(key))),
            _ => None,
        }
    }

    /// Mutual TLS is all-or-nothing.
    fn validate(&self) -> Result<()> {
        let cert = non_empty(&self.cert_file).is_some();
        let key = non_empty(&self.key_file).is_some();
        if cert != key {
            anyhow::bail!("telemetry.tls.cert_file and telemetry.tls.key_file must be set together");
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn default_log_dir() -> String {
    "logs".into()
}
fn default_data_dir() -> String {
    "data".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_server_address() -> String {
    "0.0.0.0".into()
}
fn default_server_port() -> u16 {
    8080
}

impl Config {
    /// Load, finalise and validate configuration from the config file and
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name(&path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("SS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to build configuration (file: {path})"))?;

        let mut c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.finalize();
        c.validate()?;
        Ok(c)
    }

    /// Apply telemetry defaults. Runs once, before any exporter is built.
    pub fn finalize(&mut self) {
        if let Some(telemetry) = self.telemetry.as_mut() {
            telemetry.finalize();
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.log_dir, "log_dir")?;
        ensure_non_empty(&self.data_dir, "data_dir")?;
        if self.server.port == 0 {
            anyhow::bail!("server.port must be > 0");
        }
        if let Some(telemetry) = &self.telemetry {
            telemetry.validate()?;
        }
        Ok(())
    }
}

impl TelemetryConfig {
    /// Inherit the shared endpoint into every empty per-signal endpoint and
    /// default the metrics protocol and interval.
    pub fn finalize(&mut self) {
        if let Some(metrics) = self.metrics.as_mut() {
            if metrics.endpoint.is_empty() {
                metrics.endpoint = self.endpoint.clone();
            }
            if metrics.interval_seconds == 0 {
                metrics.interval_seconds = DEFAULT_EXPORT_INTERVAL_SECS;
            }
        }
        if let Some(logs) = self.logs.as_mut() {
            if logs.endpoint.is_empty() {
                logs.endpoint = self.endpoint.clone();
            }
        }
        if let Some(traces) = self.traces.as_mut() {
            if traces.endpoint.is_empty() {
                traces.endpoint = self.endpoint.clone();
            }
            traces.sampling_rate = traces.effective_sampling_rate();
        }
    }

    /// TLS settings if transport security is switched on.
    pub fn active_tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref().filter(|t| t.enabled)
    }

    pub fn metrics_enabled(&self) -> Option<&MetricsSignalConfig> {
        self.metrics.as_ref().filter(|m| m.enabled)
    }

    pub fn logs_enabled(&self) -> Option<&LogsSignalConfig> {
        self.logs.as_ref().filter(|l| l.enabled)
    }

    pub fn traces_enabled(&self) -> Option<&TracesSignalConfig> {
        self.traces.as_ref().filter(|t| t.enabled)
    }

    fn validate(&self) -> Result<()> {
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        if let Some(m) = self.metrics_enabled() {
            ensure_non_empty(&m.endpoint, "telemetry.metrics.endpoint")?;
        }
        if let Some(l) = self.logs_enabled() {
            ensure_non_empty(&l.endpoint, "telemetry.logs.endpoint")?;
        }
        if let Some(t) = self.traces_enabled() {
            ensure_non_empty(&t.endpoint, "telemetry.traces.endpoint")?;
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            log_dir: default_log_dir(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            server: ServerConfig::default(),
            telemetry: None,
        }
    }

    fn shared(endpoint: &str) -> TelemetryConfig {
        TelemetryConfig {
            endpoint: endpoint.into(),
            metrics: Some(MetricsSignalConfig {
                enabled: true,
                ..Default::default()
            }),
            logs: Some(LogsSignalConfig {
                enabled: true,
                ..Default::default()
            }),
            traces: Some(TracesSignalConfig {
                enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_log_dir(), "logs");
        assert_eq!(default_data_dir(), "data");
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_server_port(), 8080);
        assert_eq!(Protocol::default(), Protocol::Grpc);
    }

    #[test]
    fn empty_signal_endpoints_inherit_shared_endpoint() {
        let mut t = shared("collector:4317");
        t.finalize();
        assert_eq!(t.metrics.as_ref().unwrap().endpoint, "collector:4317");
        assert_eq!(t.logs.as_ref().unwrap().endpoint, "collector:4317");
        assert_eq!(t.traces.as_ref().unwrap().endpoint, "collector:4317");
    }

    #[test]
    fn explicit_signal_endpoint_is_kept() {
        let mut t = shared("collector:4317");
        t.metrics.as_mut().unwrap().endpoint = "metrics:4317".into();
        t.finalize();
        assert_eq!(t.metrics.unwrap().endpoint, "metrics:4317");
    }

    #[test]
    fn zero_interval_defaults_to_sixty_seconds() {
        let mut t = shared("collector:4317");
        t.finalize();
        assert_eq!(t.metrics.as_ref().unwrap().interval_seconds, 60);

        let mut t = shared("collector:4317");
        t.metrics.as_mut().unwrap().interval_seconds = 15;
        t.finalize();
        assert_eq!(t.metrics.unwrap().interval_seconds, 15);
    }

    #[test]
    fn sampling_rate_defaults_to_sample_all() {
        for configured in [0.0, -0.5, 1.0, 3.0] {
            let traces = TracesSignalConfig {
                sampling_rate: configured,
                ..Default::default()
            };
            assert_eq!(traces.effective_sampling_rate(), 1.0, "rate {configured}");
        }
        let traces = TracesSignalConfig {
            sampling_rate: 0.25,
            ..Default::default()
        };
        assert_eq!(traces.effective_sampling_rate(), 0.25);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut t = shared("collector:4317");
        t.finalize();
        t.endpoint = "elsewhere:4317".into();
        t.finalize();
        assert_eq!(t.logs.unwrap().endpoint, "collector:4317");
    }

    #[test]
    fn validate_rejects_half_configured_mutual_tls() {
        let mut cfg = base_config();
        let mut t = shared("collector:4317");
        t.tls = Some(TlsConfig {
            enabled: true,
            cert_file: "/etc/ssl/client.crt".into(),
            ..Default::default()
        });
        t.finalize();
        cfg.telemetry = Some(t);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_enabled_signal_without_endpoint() {
        let mut cfg = base_config();
        let mut t = shared("");
        t.finalize();
        cfg.telemetry = Some(t);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_disabled_signal_without_endpoint() {
        let mut cfg = base_config();
        let mut t = TelemetryConfig {
            metrics: Some(MetricsSignalConfig::default()),
            ..Default::default()
        };
        t.finalize();
        cfg.telemetry = Some(t);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut cfg = base_config();
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn protocol_parses_lowercase() {
        let m: MetricsSignalConfig =
            serde_json::from_str(r#"{"enabled":true,"protocol":"http"}"#).unwrap();
        assert_eq!(m.protocol, Protocol::Http);
        assert_eq!(m.interval_seconds, 0);
    }

    #[test]
    fn tls_identity_requires_both_halves() {
        let tls = TlsConfig {
            cert_file: "c.pem".into(),
            key_file: "k.pem".into(),
            ..Default::default()
        };
        assert!(tls.client_identity().is_some());
        let tls = TlsConfig {
            cert_file: "c.pem".into(),
            ..Default::default()
        };
        assert!(tls.client_identity().is_none());
        assert!(tls.ca_file().is_none());
    }
}
