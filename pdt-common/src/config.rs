//! Configuration loading and config file resolution
//!
//! Config file resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. `PDT_CONFIG` environment variable
//! 3. User config (`~/.config/pdt/config.toml`)
//! 4. System config (`/etc/pdt/config.toml`)
//! 5. `./config.toml` in the working directory
//!
//! A missing config file is not fatal: compiled defaults are used and a
//! warning is logged. Secrets can be supplied through environment variables
//! which override the file.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PDT_CONFIG";

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PdtConfig {
    pub database: DatabaseConfig,
    pub tracker: TrackerConfig,
    /// Error-reporting endpoint
    pub raven: RavenConfig,
    pub api: ApiConfig,
    pub mail: MailConfig,
    pub logging: LoggingConfig,
    pub schedule: ScheduleConfig,
    pub worker: WorkerConfig,
}

/// Database connection parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_folder().join("pdt.db"),
        }
    }
}

/// External issue tracker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Base URL of the tracker
    pub url: String,
    /// API token used for every tracker call
    pub token: Option<String>,
    /// Search query used by the periodic case fetch
    pub search_query: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            url: "https://fogbugz.example.com".to_string(),
            token: None,
            search_query: "status:\"Resolved\"".to_string(),
        }
    }
}

/// Error reporting (Sentry/Raven-compatible DSN)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RavenConfig {
    pub dsn: Option<String>,
}

/// REST API settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Token required in `Authorization: Token <token>`; unset or empty disables the check
    pub token: Option<String>,
    /// Socket address the HTTP server binds to
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            token: None,
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Outbound mail relay
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// HTTP endpoint accepting `{recipient, subject, body}`; unset keeps mail queued
    pub relay_url: Option<String>,
    pub sender: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            sender: "pdt@localhost".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full `EnvFilter` directive
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Intervals of the periodic sync tasks, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub pull_interval_secs: u64,
    pub fetch_interval_secs: u64,
    pub push_interval_secs: u64,
    pub email_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            pull_interval_secs: 600,
            fetch_interval_secs: 3600,
            push_interval_secs: 300,
            email_interval_secs: 60,
        }
    }
}

/// Background task retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Attempts per task including the first run
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt
    pub retry_base_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_ms: 1000,
        }
    }
}

impl PdtConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Override secrets and paths from the environment
    ///
    /// `PDT_API_TOKEN`, `PDT_TRACKER_TOKEN` and `PDT_DATABASE_PATH` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("PDT_API_TOKEN") {
            self.api.token = Some(token);
        }
        if let Ok(token) = std::env::var("PDT_TRACKER_TOKEN") {
            self.tracker.token = Some(token);
        }
        if let Ok(path) = std::env::var("PDT_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
    }

    /// API token, treating an empty string as "authentication disabled"
    pub fn api_token(&self) -> Option<&str> {
        self.api.token.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Tracker token, or an error naming the missing key
    pub fn tracker_token(&self) -> Result<&str> {
        self.tracker
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "Issue tracker token not configured. Set [tracker] token in config.toml \
                     or the PDT_TRACKER_TOKEN environment variable"
                        .to_string(),
                )
            })
    }
}

/// Resolve the config file to load
///
/// Explicit locations (CLI argument, `PDT_CONFIG`) are returned even when the
/// file does not exist so that loading reports the mistake; implicit
/// locations are only returned when present.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    // Priority 3-5: well-known locations
    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("pdt").join("config.toml"));
    }
    candidates.push(PathBuf::from("/etc/pdt/config.toml"));
    candidates.push(PathBuf::from("config.toml"));

    candidates.into_iter().find(|p| p.exists())
}

/// Load configuration following the resolution order, then apply env overrides
pub fn load_config(cli_arg: Option<&Path>) -> Result<PdtConfig> {
    let mut config = match resolve_config_path(cli_arg) {
        Some(path) => {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("Read config {} failed: {}", path.display(), e))
            })?;
            let config = PdtConfig::from_toml_str(&content)?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        None => {
            warn!("No config file found, using compiled defaults");
            PdtConfig::default()
        }
    };

    config.apply_env_overrides();
    Ok(config)
}

/// OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("pdt"))
        .unwrap_or_else(|| PathBuf::from("./pdt_data"))
}
