//! OTLP exporter transport wiring shared by the logs, metrics and traces
//! exporters.
//!
//! gRPC exporters get a tonic channel whose TLS is the rustls config from
//! [`super::tls`]; HTTP exporters get a blocking reqwest client preloaded with
//! the same config. Headers travel as gRPC metadata or HTTP headers.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use hyper_util::client::legacy::connect::HttpConnector;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig, WithTonicConfig};
use tonic::{
    metadata::{MetadataKey, MetadataMap, MetadataValue},
    transport::{Channel, Endpoint},
};

use super::tls;
use crate::config::{TelemetryConfig, TlsConfig};

/// Where and how one signal is exported.
#[derive(Debug, Clone)]
pub struct ExportTarget<'a> {
    pub endpoint: &'a str,
    pub tls: Option<&'a TlsConfig>,
    pub headers: &'a HashMap<String, String>,
}

impl<'a> ExportTarget<'a> {
    /// Combine a signal's finalised endpoint with the shared settings.
    pub fn new(telemetry: &'a TelemetryConfig, endpoint: &'a str) -> Self {
        Self {
            endpoint,
            tls: telemetry.active_tls(),
            headers: &telemetry.headers,
        }
    }

    fn secure(&self) -> bool {
        self.tls.is_some()
    }
}

/// Configure a tonic-based exporter builder.
///
/// # Errors
///
/// Fails on TLS configuration errors, invalid header names/values, or an
/// endpoint that is not a valid URI.
pub fn tonic<B>(builder: B, target: &ExportTarget<'_>) -> Result<B>
where
    B: WithExportConfig + WithTonicConfig,
{
    let url = endpoint_url(target.endpoint, target.secure(), None);
    let mut builder = builder
        .with_endpoint(url.clone())
        .with_metadata(metadata(target.headers)?);

    if let Some(tls) = target.tls {
        builder = builder.with_channel(secure_channel(&url, tls)?);
    }
    Ok(builder)
}

/// Configure an HTTP/protobuf exporter builder. `signal_path` is appended when
/// the endpoint carries no path of its own, e.g. `/v1/metrics`.
///
/// # Errors
///
/// Fails on TLS configuration errors or if the HTTP client cannot be built.
pub fn http<B>(builder: B, target: &ExportTarget<'_>, signal_path: &str) -> Result<B>
where
    B: WithExportConfig + WithHttpConfig,
{
    let url = endpoint_url(target.endpoint, target.secure(), Some(signal_path));
    let mut builder = builder
        .with_endpoint(url)
        .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
        .with_headers(target.headers.clone());

    if let Some(tls) = target.tls {
        builder = builder.with_http_client(blocking_client(tls)?);
    }
    Ok(builder)
}

/// Turn a configured endpoint (`collector:4317`, `https://collector`, ...)
/// into a full URL.
pub fn endpoint_url(endpoint: &str, secure: bool, signal_path: Option<&str>) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let mut url = if endpoint.contains("://") {
        endpoint.to_owned()
    } else {
        let scheme = if secure { "https" } else { "http" };
        format!("{scheme}://{endpoint}")
    };

    if let Some(path) = signal_path {
        let authority_and_path = url.split_once("://").map_or(url.as_str(), |(_, rest)| rest);
        if !authority_and_path.contains('/') {
            url.push_str(path);
        }
    }
    url
}

fn metadata(headers: &HashMap<String, String>) -> Result<MetadataMap> {
    let mut map = MetadataMap::with_capacity(headers.len());
    for (name, value) in headers {
        let key = MetadataKey::from_bytes(name.to_ascii_lowercase().as_bytes())
            .with_context(|| format!("invalid telemetry header name: {name}"))?;
        let value = MetadataValue::try_from(value.as_str())
            .with_context(|| format!("invalid value for telemetry header {name}"))?;
        map.insert(key, value);
    }
    Ok(map)
}

/// A lazily connecting gRPC channel speaking TLS through rustls.
fn secure_channel(url: &str, tls: &TlsConfig) -> Result<Channel> {
    let config = tls::build_client_config(tls).context("failed to load TLS config")?;

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config((*config).clone())
        .https_or_http()
        .enable_http2()
        .wrap_connector(http);

    let endpoint = Endpoint::from_shared(url.to_owned())
        .with_context(|| format!("invalid OTLP endpoint: {url}"))?;
    Ok(endpoint.connect_with_connector_lazy(connector))
}

/// reqwest's blocking client owns a runtime, so it is built off the async
/// worker that runs initialisation.
fn blocking_client(tls: &TlsConfig) -> Result<reqwest::blocking::Client> {
    let config = tls::build_client_config(tls).context("failed to load TLS config")?;
    std::thread::spawn(move || {
        reqwest::blocking::Client::builder()
            .use_preconfigured_tls((*config).clone())
            .build()
    })
    .join()
    .map_err(|_| anyhow!("OTLP HTTP client builder panicked"))?
    .context("failed to build OTLP HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_endpoint_gets_scheme() {
        assert_eq!(endpoint_url("collector:4317", false, None), "http://collector:4317");
        assert_eq!(endpoint_url("collector:4317", true, None), "https://collector:4317");
    }

    #[test]
    fn explicit_scheme_is_kept() {
        assert_eq!(
            endpoint_url("http://collector:4317/", true, None),
            "http://collector:4317"
        );
    }

    #[test]
    fn signal_path_only_added_without_path() {
        assert_eq!(
            endpoint_url("collector:4318", false, Some("/v1/logs")),
            "http://collector:4318/v1/logs"
        );
        assert_eq!(
            endpoint_url("https://otlp.example.com/custom/metrics", true, Some("/v1/metrics")),
            "https://otlp.example.com/custom/metrics"
        );
    }

    #[test]
    fn headers_become_metadata() {
        let mut headers = HashMap::new();
        headers.insert("X-Api-Key".to_owned(), "secret".to_owned());
        let map = metadata(&headers).unwrap();
        assert_eq!(map.get("x-api-key").unwrap().to_str().unwrap(), "secret");
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_owned(), "v".to_owned());
        assert!(metadata(&headers).is_err());
    }
}
