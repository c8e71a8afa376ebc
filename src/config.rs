//! Client configuration
//!
//! One strongly typed struct, populated once at startup. Every field has a
//! documented default, so a config file only needs the values it changes.
//! Durations are stored as integer `_ms`/`_secs` fields and exposed through
//! `Duration` accessors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::BreakerSettings;
use crate::storage::default_cache_dir;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value the client cannot work with
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Disk caching is enabled but no cache directory could be determined
    #[error("no cache directory available; set cache_dir or disable the disk cache")]
    NoCacheDir,
}

/// Longest TTL accepted from configuration (100 years)
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// TTL override for resources under a path prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlRule {
    pub prefix: String,
    pub ttl_secs: u64,
}

/// Configuration for [`ResilientClient`](crate::ResilientClient)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL that `fetch` paths are appended to
    pub base_url: String,
    /// Minimum spacing between requests to one host (default: 100ms)
    pub min_request_interval_ms: u64,
    /// Consecutive failures that open the circuit (default: 5)
    pub breaker_failure_threshold: u32,
    /// How long the circuit stays open (default: 300s)
    pub breaker_cooldown_secs: u64,
    /// Transport attempts per logical request (default: 3)
    pub max_retry_attempts: u32,
    /// Per-attempt timeout (default: 10s)
    pub request_timeout_ms: u64,
    /// Entries held by each memory tier (default: 100)
    pub memory_cache_max_entries: usize,
    /// Byte limit of the disk tier (default: 500MB)
    pub disk_cache_max_size_bytes: u64,
    /// TTL for API responses without a matching rule (default: 24h)
    pub default_ttl_secs: u64,
    /// TTL for binary assets (default: 7 days)
    pub binary_ttl_secs: u64,
    /// Fixed wait after an HTTP 429 (default: 1s)
    pub rate_limit_backoff_ms: u64,
    /// First retry delay after a failure; doubles per attempt (default: 1s)
    pub retry_backoff_base_ms: u64,
    /// Whether binary payloads are persisted to disk
    pub disk_cache_enabled: bool,
    /// Disk cache location; the platform cache dir when unset
    pub cache_dir: Option<PathBuf>,
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Period of the background cleanup sweep (default: 300s)
    pub cleanup_interval_secs: u64,
    /// Per-prefix TTL overrides; the longest matching prefix wins
    pub ttl_rules: Vec<TtlRule>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.scryfall.com".to_string(),
            min_request_interval_ms: 100,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 300,
            max_retry_attempts: 3,
            request_timeout_ms: 10_000,
            memory_cache_max_entries: 100,
            disk_cache_max_size_bytes: 500 * 1024 * 1024,
            default_ttl_secs: 24 * 60 * 60,
            binary_ttl_secs: 7 * 24 * 60 * 60,
            rate_limit_backoff_ms: 1_000,
            retry_backoff_base_ms: 1_000,
            disk_cache_enabled: true,
            cache_dir: None,
            user_agent: concat!("steadyfetch/", env!("CARGO_PKG_VERSION")).to_string(),
            cleanup_interval_secs: 300,
            ttl_rules: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Parses a TOML document; missing fields take their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_base_url()?;

        if self.breaker_failure_threshold == 0 {
            return Err(invalid("breaker_failure_threshold", "must be greater than 0"));
        }
        if self.max_retry_attempts == 0 {
            return Err(invalid("max_retry_attempts", "must be greater than 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be greater than 0"));
        }
        if self.memory_cache_max_entries == 0 {
            return Err(invalid("memory_cache_max_entries", "must be greater than 0"));
        }
        if self.disk_cache_enabled && self.disk_cache_max_size_bytes == 0 {
            return Err(invalid("disk_cache_max_size_bytes", "must be greater than 0"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(invalid("cleanup_interval_secs", "must be greater than 0"));
        }
        check_ttl("default_ttl_secs", self.default_ttl_secs)?;
        check_ttl("binary_ttl_secs", self.binary_ttl_secs)?;
        for rule in &self.ttl_rules {
            check_ttl("ttl_rules", rule.ttl_secs)?;
        }
        if let Some(rule) = self.ttl_rules.iter().find(|rule| !rule.prefix.starts_with('/')) {
            return Err(invalid(
                "ttl_rules",
                format!("prefix {:?} must start with '/'", rule.prefix),
            ));
        }
        Ok(())
    }

    /// The base URL, which must be absolute http(s)
    pub fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| invalid("base_url", format!("{:?}: {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(invalid("base_url", "must be an absolute http(s) URL"));
        }
        Ok(url)
    }

    /// Directory the disk tier should use
    pub fn resolved_cache_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_cache_dir().ok_or(ConfigError::NoCacheDir),
        }
    }

    /// TTL for a resource path, from the longest matching rule
    pub fn ttl_for(&self, path: &str) -> Duration {
        self.ttl_rules
            .iter()
            .filter(|rule| path.starts_with(&rule.prefix))
            .max_by_key(|rule| rule.prefix.len())
            .map(|rule| Duration::from_secs(rule.ttl_secs))
            .unwrap_or_else(|| self.default_ttl())
    }

    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.breaker_failure_threshold,
            cooldown: Duration::from_secs(self.breaker_cooldown_secs),
        }
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn binary_ttl(&self) -> Duration {
        Duration::from_secs(self.binary_ttl_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt - 1)
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_base_ms).saturating_mul(factor)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn check_ttl(field: &'static str, ttl_secs: u64) -> Result<(), ConfigError> {
    if ttl_secs > MAX_TTL_SECS {
        return Err(invalid(
            field,
            format!("{} seconds exceeds the maximum of {}", ttl_secs, MAX_TTL_SECS),
        ));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}
