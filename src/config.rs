//! Configuration management for the budget MCP server.
//!
//! Configuration can be set via environment variables:
//! - `ACTUAL_URL` - URL of the remote budget server. Required before the cache can be initialized.
//! - `ACTUAL_PASSWORD` - Password (API key) for the remote budget server.
//! - `BUDGET_ID` - Sync id of the budget to download.
//! - `BUDGET_PASSWORD` - Budget-file password sent with every remote request.
//! - `BUDGET_CACHE_DIR` - Optional. Local cache directory. Defaults to `/tmp/actual-mcp-data`.
//! - `ACTUAL_SINCE_DATE` - Optional. Earliest transaction date to pull (`YYYY-MM-DD`). Defaults to `1970-01-01`.
//! - `ACTUAL_REQUEST_TIMEOUT_SECS` - Optional. HTTP timeout for remote calls. Defaults to `30`.
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8080`.
//!
//! The remote settings are not validated here. A missing value is reported
//! by the budget backend the first time it tries to connect.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

pub const DEFAULT_CACHE_DIR: &str = "/tmp/actual-mcp-data";
pub const DEFAULT_SINCE_DATE: &str = "1970-01-01";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Connection parameters for the remote budget server.
#[derive(Clone, Default)]
pub struct RemoteConfig {
    /// Remote server URL
    pub server_url: Option<String>,

    /// Password for the remote server
    pub password: Option<String>,

    /// Sync id of the budget to download
    pub budget_id: Option<String>,

    /// Budget-file password (encrypted budgets only)
    pub budget_password: Option<String>,

    /// Earliest transaction date pulled into the working copy
    pub since_date: NaiveDate,

    /// Timeout applied to every remote request
    pub request_timeout: Duration,
}

// Secrets stay out of logs.
impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("server_url", &self.server_url)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("budget_id", &self.budget_id)
            .field(
                "budget_password",
                &self.budget_password.as_ref().map(|_| "***"),
            )
            .field("since_date", &self.since_date)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl RemoteConfig {
    /// Return a required setting or the name of the variable that is missing.
    pub fn require<'a>(value: &'a Option<String>, var: &str) -> Result<&'a str, ConfigError> {
        value
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote budget connection
    pub remote: RemoteConfig,

    /// Local cache directory for the budget working copy
    pub cache_dir: PathBuf,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `PORT`, `ACTUAL_REQUEST_TIMEOUT_SECS`
    /// or `ACTUAL_SINCE_DATE` cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let since_date_raw = var("ACTUAL_SINCE_DATE").unwrap_or_else(|| DEFAULT_SINCE_DATE.to_string());
        let since_date = NaiveDate::parse_from_str(&since_date_raw, "%Y-%m-%d").map_err(|e| {
            ConfigError::InvalidValue("ACTUAL_SINCE_DATE".to_string(), format!("{}", e))
        })?;

        let timeout_secs: u64 = var("ACTUAL_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("ACTUAL_REQUEST_TIMEOUT_SECS".to_string(), format!("{}", e))
            })?;

        let remote = RemoteConfig {
            server_url: var("ACTUAL_URL"),
            password: var("ACTUAL_PASSWORD"),
            budget_id: var("BUDGET_ID"),
            budget_password: var("BUDGET_PASSWORD"),
            since_date,
            request_timeout: Duration::from_secs(timeout_secs),
        };

        let cache_dir = var("BUDGET_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = var("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        Ok(Self {
            remote,
            cache_dir,
            host,
            port,
        })
    }
}
