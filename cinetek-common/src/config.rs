//! Configuration loading for the Cinetek services
//!
//! Bootstrap settings come from a TOML file; individual values can be
//! overridden per the priority order:
//! 1. Command-line arguments (--database, --port)
//! 2. Environment variables (CINETEK_DATABASE, TMDB_API_KEY, ...)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime; the service must restart
/// to pick up changes to the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (relative or absolute)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP server port (default: 5731, the reconciler's standard port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// External movie catalog settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Library identity settings
    #[serde(default)]
    pub library: LibraryConfig,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

// The serde defaults only apply during deserialization; keep the plain
// Default (used when no config file exists) in step with them.
impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: default_port(),
            catalog: CatalogConfig::default(),
            library: LibraryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// External catalog (TMDB-shaped API) client settings
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// API key; the TMDB_API_KEY environment variable takes precedence.
    /// A missing key is fatal at startup.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the catalog API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Preferred language for titles and overviews
    #[serde(default = "default_language")]
    pub language: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum interval between catalog requests in milliseconds (0 disables)
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,

    /// Number of retries after an HTTP 429 before giving up
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Base backoff delay after an HTTP 429 in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            language: default_language(),
            timeout_secs: default_timeout_secs(),
            pace_ms: default_pace_ms(),
            retry_limit: default_retry_limit(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl CatalogConfig {
    /// Resolve the API key: environment variable first, then TOML.
    pub fn resolve_api_key(&self, env_value: Option<String>) -> Result<String> {
        env_value
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_key.clone())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "catalog API key missing (set TMDB_API_KEY or [catalog] api_key)".to_string(),
                )
            })
    }
}

/// Library identity settings
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    /// Owner of watchlist/seen rows written by the apply pass
    #[serde(default = "default_user_id")]
    pub user_id: i64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_port() -> u16 {
    5731
}

fn default_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_language() -> String {
    "fr-FR".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_pace_ms() -> u64 {
    250
}

fn default_retry_limit() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1500
}

fn default_user_id() -> i64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Load configuration from an explicit path, or from the default
    /// location (`<config dir>/cinetek/cinetek.toml`) when none is given.
    /// A missing default file is not an error; defaults apply.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(p) => {
                if !p.exists() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            }
            None => default_config_path().filter(|p| p.exists()),
        };

        match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                let config: TomlConfig = toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            None => {
                info!("No configuration file found, using defaults");
                Ok(TomlConfig::default())
            }
        }
    }
}

/// Default configuration file path for the platform
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cinetek").join("cinetek.toml"))
}

/// Database path resolution following the standard priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable value (passed in by the caller)
/// 3. TOML config file
/// 4. OS-dependent default (fallback)
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    env_value: Option<String>,
    config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Some(path) = env_value.filter(|v| !v.trim().is_empty()) {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    default_database_path()
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cinetek").join("cinetek.db"))
        .unwrap_or_else(|| PathBuf::from("cinetek.db"))
}
