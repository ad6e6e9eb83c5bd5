//! Configuration types
//!
//! Configuration is read from a TOML file, then overridden by `ASSETDEF_*`
//! environment variables, then validated. Every field has a default so an
//! empty file (or no file) is a working setup against the public repository.

use crate::error::{AssetDefResult, ConfigError};
use crate::TOKENSCRIPT_SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Canonical repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Base URL; the checksummed contract address is appended as a path segment.
    pub base_url: String,
    /// Value sent in the `Accept` header.
    pub accept: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: format!("https://repo.tokenscript.org/{}", TOKENSCRIPT_SCHEMA_VERSION),
            accept: "application/tokenscript+xml; charset=UTF-8".to_string(),
        }
    }
}

/// Client identification headers sent with every repository request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientIdentity {
    pub client_name: String,
    pub client_version: String,
    pub platform_name: String,
    pub platform_version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            client_name: "assetdef".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            platform_name: std::env::consts::OS.to_string(),
            platform_version: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Retry settings for fetches.
///
/// Script-pointer URLs get `script_uri_immediate_retries` back-to-back
/// retries followed by `script_uri_delayed_retries` retries spaced by
/// `script_uri_retry_delay_ms`. Repository URLs are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub script_uri_immediate_retries: u32,
    pub script_uri_delayed_retries: u32,
    pub script_uri_retry_delay_ms: u64,
    /// Unconditional refetches after a truncated body.
    pub truncation_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            script_uri_immediate_retries: 1,
            script_uri_delayed_retries: 1,
            script_uri_retry_delay_ms: 3_000,
            truncation_retries: 1,
        }
    }
}

impl RetryConfig {
    /// Delay before each delayed script-URI retry.
    pub fn script_uri_retry_delay(&self) -> Duration {
        Duration::from_millis(self.script_uri_retry_delay_ms)
    }

    /// Total attempts a script-URI fetch may make.
    pub fn script_uri_max_attempts(&self) -> u32 {
        1 + self.script_uri_immediate_retries + self.script_uri_delayed_retries
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetDefConfig {
    pub repository: RepositoryConfig,
    pub client: ClientIdentity,
    pub retry: RetryConfig,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Buffered signals per change-bus subscriber before it lags.
    pub bus_capacity: usize,
    /// Whether clipboard contents may trigger opportunistic fetches.
    pub clipboard_fetch_enabled: bool,
}

impl Default for AssetDefConfig {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig::default(),
            client: ClientIdentity::default(),
            retry: RetryConfig::default(),
            request_timeout_ms: 30_000,
            bus_capacity: 256,
            clipboard_fetch_enabled: true,
        }
    }
}

impl AssetDefConfig {
    /// Load configuration: optional TOML file, then environment, then validation.
    pub fn load(path: Option<&Path>) -> AssetDefResult<Self> {
        let config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        let config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. Missing sections fall back to defaults.
    pub fn from_path(path: &Path) -> AssetDefResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    /// Parse TOML text.
    pub fn from_toml(contents: &str) -> AssetDefResult<Self> {
        toml::from_str(contents).map_err(|e| {
            ConfigError::Parse {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Apply `ASSETDEF_*` overrides from the process environment.
    ///
    /// Environment variables:
    /// - `ASSETDEF_REPOSITORY_URL`: canonical repository base URL
    /// - `ASSETDEF_CLIENT_NAME`: `X-Client-Name` header value
    /// - `ASSETDEF_CLIENT_VERSION`: `X-Client-Version` header value
    /// - `ASSETDEF_REQUEST_TIMEOUT_MS`: per-request timeout
    /// - `ASSETDEF_RETRY_DELAY_MS`: delay before the delayed script-URI retry
    /// - `ASSETDEF_BUS_CAPACITY`: change-bus buffer per subscriber
    /// - `ASSETDEF_CLIPBOARD_FETCH`: "true" or "false"
    pub fn apply_env(self) -> AssetDefResult<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(mut self, lookup: F) -> AssetDefResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ASSETDEF_REPOSITORY_URL") {
            self.repository.base_url = url;
        }
        if let Some(name) = lookup("ASSETDEF_CLIENT_NAME") {
            self.client.client_name = name;
        }
        if let Some(version) = lookup("ASSETDEF_CLIENT_VERSION") {
            self.client.client_version = version;
        }
        if let Some(raw) = lookup("ASSETDEF_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_number("ASSETDEF_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("ASSETDEF_RETRY_DELAY_MS") {
            self.retry.script_uri_retry_delay_ms = parse_number("ASSETDEF_RETRY_DELAY_MS", &raw)?;
        }
        if let Some(raw) = lookup("ASSETDEF_BUS_CAPACITY") {
            self.bus_capacity = parse_number("ASSETDEF_BUS_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("ASSETDEF_CLIPBOARD_FETCH") {
            self.clipboard_fetch_enabled = raw.trim().to_lowercase() != "false";
        }
        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AssetDefResult<()> {
        let base = self.repository.base_url.trim();
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(ConfigError::InvalidValue {
                field: "repository.base_url".to_string(),
                value: self.repository.base_url.clone(),
                reason: "must be an http(s) URL".to_string(),
            }
            .into());
        }

        if self.repository.accept.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repository.accept".to_string(),
                value: self.repository.accept.clone(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        if self.client.client_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "client.client_name".to_string(),
                value: self.client.client_name.clone(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms".to_string(),
                value: self.request_timeout_ms.to_string(),
                reason: "must be > 0".to_string(),
            }
            .into());
        }

        if self.bus_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bus_capacity".to_string(),
                value: self.bus_capacity.to_string(),
                reason: "must be > 0".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> AssetDefResult<T> {
    raw.trim().parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "must be a non-negative integer".to_string(),
        }
        .into()
    })
}
