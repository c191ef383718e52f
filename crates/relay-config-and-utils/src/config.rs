//! Configuration management for SimpleRelay hosts.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default relay HTTPS base URL (can be overridden at compile time via SIMPLE_RELAY_HTTPS_URL).
pub const DEFAULT_RELAY_HTTPS_URL: &str = match option_env!("SIMPLE_RELAY_HTTPS_URL") {
    Some(url) => url,
    None => "https://relay.simplerelay.dev",
};

/// Default relay WebSocket URL (can be overridden at compile time via SIMPLE_RELAY_WSS_URL).
pub const DEFAULT_RELAY_WSS_URL: &str = match option_env!("SIMPLE_RELAY_WSS_URL") {
    Some(url) => url,
    None => "wss://relay.simplerelay.dev/ws",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base HTTPS URL of the relay; `/ping` is appended for connectivity probes.
    #[serde(default = "default_relay_https_url")]
    pub relay_https_url: String,
    /// WebSocket URL of the relay; connection parameters are appended as a query.
    #[serde(default = "default_relay_wss_url")]
    pub relay_wss_url: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_relay_https_url() -> String {
    DEFAULT_RELAY_HTTPS_URL.to_string()
}

fn default_relay_wss_url() -> String {
    DEFAULT_RELAY_WSS_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            relay_https_url: default_relay_https_url(),
            relay_wss_url: default_relay_wss_url(),
        }
    }
}

impl Config {
    /// Load configuration from the config file if present, then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("SIMPLE_RELAY_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("SIMPLE_RELAY_HTTPS_URL") {
            self.relay_https_url = url;
        }
        if let Ok(url) = std::env::var("SIMPLE_RELAY_WSS_URL") {
            self.relay_wss_url = url;
        }
    }

    /// Check that both relay URLs parse and use the expected schemes.
    pub fn validate(&self) -> CoreResult<()> {
        let https = self.relay_https_url()?;
        if !matches!(https.scheme(), "https" | "http") {
            return Err(CoreError::Config(format!(
                "relay_https_url must be http(s), got {}",
                https.scheme()
            )));
        }

        let wss = self.relay_wss_url()?;
        if !matches!(wss.scheme(), "wss" | "ws") {
            return Err(CoreError::Config(format!(
                "relay_wss_url must be ws(s), got {}",
                wss.scheme()
            )));
        }

        Ok(())
    }

    /// Get the relay HTTPS base URL as a parsed URL.
    pub fn relay_https_url(&self) -> CoreResult<Url> {
        Url::parse(&self.relay_https_url).map_err(CoreError::from)
    }

    /// Get the relay WebSocket URL as a parsed URL.
    pub fn relay_wss_url(&self) -> CoreResult<Url> {
        Url::parse(&self.relay_wss_url).map_err(CoreError::from)
    }
}
