//! `service-seed`: binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from the config file and environment.
//! 2. Create the data and log directories.
//! 3. Initialise telemetry (metrics, log export, logger, traces).
//! 4. Build the Axum router and serve until SIGINT/SIGTERM.
//! 5. Flush and shut down every telemetry sink within a bounded budget.

mod bootstrap;
mod config;
mod server;
mod telemetry;

use std::process::ExitCode;

use anyhow::{Context, Result};
use serde_json::Value;

use config::Config;
use server::state::AppState;
use telemetry::{shutdown::SHUTDOWN_BUDGET, Telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    // -----------------------------------------------------------------------
    // 1-2. Configuration and filesystem
    // -----------------------------------------------------------------------
    let cfg = match Config::from_env().and_then(|cfg| {
        bootstrap::bootstrap_filesystem(&cfg)?;
        Ok(cfg)
    }) {
        Ok(cfg) => cfg,
        Err(e) => {
            // The logger is not up yet.
            eprintln!("ERROR: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // -----------------------------------------------------------------------
    // 3. Telemetry
    // -----------------------------------------------------------------------
    let telemetry = match Telemetry::init(&cfg) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let logger = telemetry.logger.clone();
    if let Err(e) = logger.install_global() {
        logger.warn(format_args!("{e:#}"));
    }
    logger.info_with(
        "service-seed starting",
        &[
            ("version", Value::from(telemetry::resource::VERSION)),
            ("data_dir", Value::from(cfg.data_dir.as_str())),
            ("log_file", Value::from(logger.file_path().display().to_string())),
            ("structured_logs", Value::from(logger.has_structured_sink())),
            ("otlp_metrics", Value::from(telemetry.metrics.exports_otlp())),
            ("tracing", Value::from(telemetry.tracer.is_some())),
        ],
    );

    // -----------------------------------------------------------------------
    // 4. HTTP server
    // -----------------------------------------------------------------------
    let served = serve(&cfg, &telemetry).await;
    if let Err(e) = &served {
        logger.fatal(format_args!("{e:#}"));
    }

    // -----------------------------------------------------------------------
    // 5. Telemetry shutdown
    // -----------------------------------------------------------------------
    telemetry.shutdown.shutdown(SHUTDOWN_BUDGET).await;
    logger.info("service-seed stopped");
    logger.close();

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

async fn serve(cfg: &Config, telemetry: &Telemetry) -> Result<()> {
    let state = AppState::new(
        telemetry.logger.clone(),
        telemetry.metrics.clone(),
        telemetry.tracer.clone(),
        &cfg.data_dir,
        &cfg.log_dir,
    );
    let router = server::router::build(state);

    let addr = format!("{}:{}", cfg.server.address, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("HTTP server failed to bind {addr}"))?;
    telemetry
        .logger
        .info_with("listening", &[("addr", Value::from(addr))]);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
