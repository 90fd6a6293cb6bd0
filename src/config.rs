//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_WS_URL: &str = "http://localhost:3000";
pub const DEFAULT_TOKEN_FILE: &str = ".famcart/tokens.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;
pub const DEFAULT_NOTIFICATION_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Backoff bounds for the realtime reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    #[must_use]
    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms.max(self.initial_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub ws_url: String,
    pub token_file: PathBuf,
    pub timeouts: HttpTimeouts,
    pub reconnect: ReconnectPolicy,
    pub notification_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            ws_url: DEFAULT_WS_URL.to_owned(),
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            timeouts: HttpTimeouts {
                request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            reconnect: ReconnectPolicy {
                initial_ms: DEFAULT_RECONNECT_INITIAL_MS,
                max_ms: DEFAULT_RECONNECT_MAX_MS,
            },
            notification_timeout_ms: DEFAULT_NOTIFICATION_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// A `.env` file in the working directory is honored outside of tests.
    ///
    /// Optional:
    /// - `FSS_API_URL`: REST base URL, default `http://localhost:3000/api`
    /// - `FSS_WS_URL`: realtime base URL, default `http://localhost:3000`
    /// - `FSS_TOKEN_FILE`: token cache path, default `.famcart/tokens.json`
    /// - `FSS_REQUEST_TIMEOUT_SECS`: default 30
    /// - `FSS_CONNECT_TIMEOUT_SECS`: default 10
    /// - `FSS_RECONNECT_INITIAL_MS`: default 1000
    /// - `FSS_RECONNECT_MAX_MS`: default 10000
    /// - `FSS_NOTIFICATION_TIMEOUT_MS`: default 3000
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_url = env_url("FSS_API_URL", DEFAULT_API_URL);
        let ws_url = env_url("FSS_WS_URL", DEFAULT_WS_URL);
        let token_file = std::env::var("FSS_TOKEN_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE), PathBuf::from);
        let timeouts = HttpTimeouts {
            request_secs: env_parse_u64("FSS_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: env_parse_u64("FSS_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };
        let reconnect = ReconnectPolicy {
            initial_ms: env_parse_u64("FSS_RECONNECT_INITIAL_MS", DEFAULT_RECONNECT_INITIAL_MS)?,
            max_ms: env_parse_u64("FSS_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS)?,
        };
        let notification_timeout_ms =
            env_parse_u64("FSS_NOTIFICATION_TIMEOUT_MS", DEFAULT_NOTIFICATION_TIMEOUT_MS)?;

        Ok(Self { api_url, ws_url, token_file, timeouts, reconnect, notification_timeout_ms })
    }

    #[must_use]
    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }
}

fn env_url(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_owned())
        .trim_end_matches('/')
        .to_owned()
}

fn env_parse_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue { var: key, value: raw }),
        _ => Ok(default),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
