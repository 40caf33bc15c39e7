//! Client settings, loadable from TOML or JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::error::{RealtimeError, Result};

/// Settings for a [`RealtimeClient`](crate::client::RealtimeClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the realtime API.
    pub url: String,
    /// Response timeout in milliseconds (default: 10000).
    pub request_timeout_ms: u64,
    /// Timeout for opening a socket in milliseconds (default: 10000).
    pub connect_timeout_ms: u64,
    /// Reconnection schedule.
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::from("ws://localhost:8080/rt"),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Config for `url` with every other setting at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Response timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Socket open timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Loads a `.toml` or `.json` config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ClientConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| RealtimeError::Config(e.to_string()))?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                return Err(RealtimeError::Config(format!(
                    "unsupported config file extension: {ext}"
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects an empty url, zero timeouts and a malformed backoff.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(RealtimeError::Config("url must not be empty".to_string()));
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(RealtimeError::Config(
                "timeouts must be positive".to_string(),
            ));
        }
        self.backoff.validate()
    }
}
