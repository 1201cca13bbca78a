/// Server Configuration
///
/// All settings come from environment variables. Unset variables fall back to
/// defaults; set-but-invalid values are rejected at startup rather than
/// silently replaced.
///
/// Environment Variables:
/// - SERVER_NAME: Name reported in MCP initialize responses (default: "gcs-mcp-server")
/// - SERVER_VERSION: Version string (default: crate version)
/// - MCP_TRANSPORT_MODE: "stdio", "http", or "both" (default: "http")
/// - HOST: Bind address for HTTP mode (default: "0.0.0.0")
/// - PORT: Port number for HTTP mode (default: 8080)
/// - WORKER_THREADS: HTTP worker count (default: CPU count, max 16)
/// - GOOGLE_CLOUD_PROJECT / GCLOUD_PROJECT: Project for bucket listing and creation
/// - STORAGE_EMULATOR_HOST: Storage emulator address; disables authentication
/// - GCS_DEFAULT_LOCATION: Default location for create_bucket (default: "US")
/// - GCS_REQUEST_TIMEOUT_SECS: Per-request backend timeout (default: 60)
/// - LOG_FORMAT: "text" or "json" (default: "text")

use std::str::FromStr;
use std::time::Duration;

use crate::storage::gcs::GcsOptions;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How the server talks to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Http,
    Both,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportMode::Stdio),
            "http" => Ok(TransportMode::Http),
            "both" => Ok(TransportMode::Both),
            _ => Err("must be 'stdio', 'http', or 'both'".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err("must be 'text' or 'json'".to_string()),
        }
    }
}

/// Defaults that tool descriptors advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDefaults {
    pub bucket_location: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub transport: TransportMode,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub log_format: LogFormat,
    pub project: Option<String>,
    pub emulator_host: Option<String>,
    pub request_timeout: Duration,
    pub tools: ToolDefaults,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let workers = match get("WORKER_THREADS") {
            Some(v) => parse::<usize>("WORKER_THREADS", &v)?.max(1),
            None => num_cpus::get().clamp(1, 16),
        };

        let timeout_secs = match get("GCS_REQUEST_TIMEOUT_SECS") {
            Some(v) => parse::<u64>("GCS_REQUEST_TIMEOUT_SECS", &v)?,
            None => 60,
        };
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "GCS_REQUEST_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            name: get("SERVER_NAME").unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            version: get("SERVER_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            transport: match get("MCP_TRANSPORT_MODE") {
                Some(v) => parse("MCP_TRANSPORT_MODE", &v)?,
                None => TransportMode::Http,
            },
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: match get("PORT") {
                Some(v) => parse("PORT", &v)?,
                None => 8080,
            },
            workers,
            log_format: match get("LOG_FORMAT") {
                Some(v) => parse("LOG_FORMAT", &v)?,
                None => LogFormat::Text,
            },
            project: get("GOOGLE_CLOUD_PROJECT").or_else(|| get("GCLOUD_PROJECT")),
            emulator_host: get("STORAGE_EMULATOR_HOST"),
            request_timeout: Duration::from_secs(timeout_secs),
            tools: ToolDefaults {
                bucket_location: get("GCS_DEFAULT_LOCATION").unwrap_or_else(|| "US".to_string()),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn gcs_options(&self) -> GcsOptions {
        GcsOptions {
            project: self.project.clone(),
            emulator_host: self.emulator_host.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
