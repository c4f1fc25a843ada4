//! Client and server configuration parsed from environment variables.

use std::path::PathBuf;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PORT: u16 = 3000;
/// Seven days, matching `server::accounts::DEFAULT_SESSION_TTL`.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse failed: {0}")]
    Parse(String),
    #[error("no session directory; set APIARY_SESSION_DIR")]
    NoSessionDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the API, without a trailing slash.
    pub api_base_url: String,
    /// Directory holding the persisted session record.
    pub session_dir: PathBuf,
    pub timeouts: Timeouts,
}

impl ClientConfig {
    /// Build client config from environment variables.
    ///
    /// Optional:
    /// - `APIARY_API_URL`: default `http://127.0.0.1:3000/api`
    /// - `APIARY_SESSION_DIR`: default `<user config dir>/apiary`
    /// - `APIARY_REQUEST_TIMEOUT_SECS`: default 10
    /// - `APIARY_CONNECT_TIMEOUT_SECS`: default 5
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url =
            normalize_base_url(&std::env::var("APIARY_API_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()));
        let session_dir = match std::env::var("APIARY_SESSION_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => default_session_dir().ok_or(ConfigError::NoSessionDir)?,
        };
        let timeouts = Timeouts {
            request_secs: env_parse_u64("APIARY_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("APIARY_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        Ok(Self { api_base_url, session_dir, timeouts })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// JSON accounts file; the server starts with no accounts when absent.
    pub accounts_path: Option<PathBuf>,
    /// Lifetime of a bearer session issued at login.
    pub session_ttl_secs: u64,
}

impl ServerConfig {
    /// Build server config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000; a value that is not a port is an error
    /// - `APIARY_ACCOUNTS`: accounts JSON path
    /// - `APIARY_SESSION_TTL_SECS`: default 604800 (seven days)
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Parse(format!("invalid PORT: {raw}")))?,
            Err(_) => DEFAULT_PORT,
        };
        let accounts_path = std::env::var("APIARY_ACCOUNTS")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let session_ttl_secs = env_parse_u64("APIARY_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS);
        Ok(Self { port, accounts_path, session_ttl_secs })
    }
}

#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn default_session_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("apiary"))
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
