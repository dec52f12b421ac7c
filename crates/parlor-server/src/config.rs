//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::websocket::handler::HandlerSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Configuration for the parlor server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind; `0` picks a free port.
    pub port: u16,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Outbound frames buffered per connection before it counts as stalled.
    pub max_send_queue: usize,
    /// Upper bound on a single socket write.
    pub send_timeout_ms: u64,
    /// Ping interval for live connections.
    pub heartbeat_interval_secs: u64,
    /// Require a bearer token on `/ws/{client_id}`.
    pub require_auth: bool,
    /// HS256 signing secret. A random one is generated when unset.
    pub jwt_secret: Option<String>,
    pub token_ttl_minutes: i64,
    /// Broadcast a disconnect notice for abnormal closes too.
    pub notify_on_abnormal_close: bool,
    /// Largest accepted message body in bytes.
    pub max_message_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            db_path: default_db_path(),
            max_send_queue: 256,
            send_timeout_ms: 5_000,
            heartbeat_interval_secs: 30,
            require_auth: false,
            jwt_secret: None,
            token_ttl_minutes: 30,
            notify_on_abnormal_close: false,
            max_message_len: 4096,
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid by a JSON file when given, then by `PARLOR_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PARLOR_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PARLOR_PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PARLOR_PORT",
                value: port,
            })?;
        }
        if let Some(path) = lookup("PARLOR_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(secret) = lookup("PARLOR_JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }
        if let Some(flag) = lookup("PARLOR_REQUIRE_AUTH") {
            self.require_auth = parse_bool(&flag).ok_or(ConfigError::InvalidEnv {
                key: "PARLOR_REQUIRE_AUTH",
                value: flag,
            })?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            send_timeout: self.send_timeout(),
            heartbeat_interval: self.heartbeat_interval(),
            notify_on_abnormal_close: self.notify_on_abnormal_close,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".parlor")
        .join("parlor.db")
}
