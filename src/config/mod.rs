//! Configuration management.
//!
//! Supports configuration from:
//! - Built-in defaults
//! - TOML config files
//! - Environment variables (`PALWIRE_*`)
//!
//! [`Config::load`] layers them in that order.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PalError, Result};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend connection settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Event stream settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Session cache defaults
    #[serde(default)]
    pub cache: CacheConfig,

    /// Client identity settings
    #[serde(default)]
    pub identity: IdentityConfig,
}

impl Config {
    /// Create a config pointing at `base_url` with all other values defaulted
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.server.base_url = normalize_base_url(&base_url.into());
        config
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| PalError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| PalError::Config(format!("Failed to parse config: {e}")))?;
        config.server.base_url = normalize_base_url(&config.server.base_url);
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Overlay `PALWIRE_*` environment variables onto this config
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var("PALWIRE_BASE_URL") {
            self.server.base_url = normalize_base_url(&url);
        }
        if let Some(ms) = env_u64("PALWIRE_CONNECT_TIMEOUT_MS") {
            self.server.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_u64("PALWIRE_REQUEST_TIMEOUT_MS") {
            self.server.request_timeout_ms = ms;
        }
        if let Some(ms) = env_u64("PALWIRE_RECONNECT_DELAY_MS") {
            self.stream.reconnect_delay_ms = ms;
        }
        self
    }

    /// Defaults, then `path` if given, then the environment
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.apply_env())
    }

    /// Full URL for an API path
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}{}", self.server.base_url, path)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the backend (no trailing slash)
    pub base_url: String,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Whole-request timeout for handshake and calls, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Event stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay between a stream ending and the next connection attempt
    pub reconnect_delay_ms: u64,

    /// Connect timeout for each stream attempt
    pub connect_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    /// Reconnect delay as a `Duration`
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable session caches
    pub enabled: bool,

    /// Default per-cache entry limit
    pub capacity: usize,

    /// Default sliding TTL in milliseconds
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 64,
            ttl_ms: 5 * 60 * 1000,
        }
    }
}

impl CacheConfig {
    /// TTL as a `Duration`
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Client identity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Override for the persisted client id file
    pub client_id_path: Option<PathBuf>,
}

impl IdentityConfig {
    /// Configured path, or the per-user default
    pub fn resolve_path(&self) -> Option<PathBuf> {
        self.client_id_path
            .clone()
            .or_else(crate::session::default_client_id_path)
    }
}
