//! Configuration loading.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. `--config <path>` (CLI flag, or any explicit path)
//! 2. `~/.config/coachway/config.toml` (platform config dir)
//! 3. Built-in defaults
//!
//! Every section and field is optional.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::retry::RetryPolicy;
use crate::types::TtlTable;
use crate::{CoachwayError, Result};

/// Client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Backend endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API root (default: http://localhost:8080/api).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Backoff for transient read failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

/// Response cache limits.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Entry cap before oldest-first eviction (default: 500).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub ttl: TtlConfig,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl: TtlConfig::default(),
        }
    }
}

fn default_max_entries() -> usize {
    500
}

impl CacheSection {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.max_entries)
            .ttl(self.ttl.table())
    }
}

/// Per-category TTL overrides in seconds. Unset categories keep their default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtlConfig {
    #[serde(default)]
    pub routes_secs: Option<u64>,
    #[serde(default)]
    pub cities_secs: Option<u64>,
    #[serde(default)]
    pub companies_secs: Option<u64>,
    #[serde(default)]
    pub default_secs: Option<u64>,
}

impl TtlConfig {
    pub fn table(&self) -> TtlTable {
        let defaults = TtlTable::default();
        let pick = |secs: Option<u64>, fallback: Duration| {
            secs.map(Duration::from_secs).unwrap_or(fallback)
        };
        TtlTable {
            routes: pick(self.routes_secs, defaults.routes),
            cities: pick(self.cities_secs, defaults.cities),
            companies: pick(self.companies_secs, defaults.companies),
            default: pick(self.default_secs, defaults.default),
        }
    }
}

/// Session persistence and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Refresh endpoint relative to `api.base_url` (default: /auth/refresh).
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// File the access token is persisted to. Unset keeps it in memory only.
    #[serde(default)]
    pub token_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_path: default_refresh_path(),
            token_path: None,
        }
    }
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the user config file is
    /// used when present, otherwise built-in defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(path) if path.exists() => path.to_path_buf(),
            Some(path) => {
                return Err(CoachwayError::Configuration(format!(
                    "Config file not found: {path:?}"
                )));
            }
            None => match Self::user_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        Self::load_from_file(&path)
    }

    /// `~/.config/coachway/config.toml` on Linux; platform equivalent elsewhere.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("coachway").join("config.toml"))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CoachwayError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            CoachwayError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CoachwayError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(CoachwayError::Configuration(
                "api.base_url must not be empty".to_string(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(CoachwayError::Configuration(
                "api.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(CoachwayError::Configuration(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }
}
