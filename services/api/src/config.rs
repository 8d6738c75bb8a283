//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub summary_model: String,
    pub catalog: CatalogConfig,
    pub jobs: JobsConfig,
    pub status_buffer: usize,
    pub sync_verify_files: bool,
}

/// Settings of the external catalog client.
#[derive(Clone, Debug)]
pub struct CatalogConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub manifest_ttl: Duration,
    pub listing_ttl: Duration,
}

/// Settings of the job dispatcher.
#[derive(Clone, Debug)]
pub struct JobsConfig {
    /// Size of the worker pool. Zero disables the pool; jobs then only run via `run`.
    pub worker_count: usize,
    /// Upper bound on one summarizer call.
    pub generation_timeout: Duration,
    /// Summaries one user may hold per document.
    pub summary_quota: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            generation_timeout: Duration::from_secs(120),
            summary_quota: 3,
        }
    }
}

impl CatalogConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
            manifest_ttl: Duration::from_secs(15 * 60),
            listing_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Reads an optional variable and parses it, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Summarizer Settings ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let summary_model =
            std::env::var("SUMMARY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        // --- Load Catalog Settings ---
        let base_url = std::env::var("CATALOG_BASE_URL")
            .map_err(|_| ConfigError::MissingVar("CATALOG_BASE_URL".to_string()))?;
        let catalog = CatalogConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(parse_var("CATALOG_TIMEOUT_SECS", 10u64)?),
            manifest_ttl: Duration::from_secs(parse_var("MANIFEST_TTL_SECS", 900u64)?),
            listing_ttl: Duration::from_secs(parse_var("LISTING_TTL_SECS", 300u64)?),
        };

        // --- Load Job Settings ---
        let jobs = JobsConfig {
            worker_count: parse_var("WORKER_COUNT", 4usize)?,
            generation_timeout: Duration::from_secs(parse_var("GENERATION_TIMEOUT_SECS", 120u64)?),
            summary_quota: parse_var("SUMMARY_QUOTA", 3i64)?,
        };

        let status_buffer = parse_var("STATUS_BUFFER", 256usize)?;
        if status_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "STATUS_BUFFER".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let sync_verify_files = parse_var("SYNC_VERIFY_FILES", false)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            summary_model,
            catalog,
            jobs,
            status_buffer,
            sync_verify_files,
        })
    }
}
