/// GCS MCP Server Entry Point
///
/// Loads configuration from the environment, resolves Google Cloud credentials,
/// registers the storage tools, then starts the selected transport.
///
/// Environment Variables:
/// - SERVER_NAME / SERVER_VERSION: reported in initialize (default: crate name/version)
/// - MCP_TRANSPORT_MODE: "stdio", "http", or "both" (default: "http")
/// - HOST / PORT: bind address for HTTP mode (default: 0.0.0.0:8080)
/// - WORKER_THREADS: HTTP worker count (default: CPU count, max 16)
/// - LOG_FORMAT: "text" or "json" (default: "text"); RUST_LOG sets the filter
/// - GOOGLE_CLOUD_PROJECT, GOOGLE_APPLICATION_CREDENTIALS, STORAGE_EMULATOR_HOST,
///   GCS_DEFAULT_LOCATION, GCS_REQUEST_TIMEOUT_SECS: storage backend settings

mod core;
mod storage;
mod tools;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::core::config::{LogFormat, ServerConfig, TransportMode};
use crate::core::server;
use crate::storage::gcs::GcsClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    let storage = GcsClient::new(config.gcs_options()).context("failed to initialize storage client")?;
    let state = server::build_state(&config, Arc::new(storage)).context("failed to register tools")?;

    match config.transport {
        TransportMode::Stdio => server::run_server_stdio(state).await?,
        TransportMode::Http => server::run_server_http(state, &config).await?,
        TransportMode::Both => {
            // STDIO in the background, HTTP in the foreground
            let stdio_state = state.clone();
            let stdio_handle = tokio::spawn(async move {
                if let Err(e) = server::run_server_stdio(stdio_state).await {
                    tracing::error!(error = %e, "STDIO server error");
                }
            });

            let http_result = server::run_server_http(state, &config).await;
            stdio_handle.abort();
            http_result?;
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout belongs to the STDIO transport.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_ansi(false).init(),
    }
}
