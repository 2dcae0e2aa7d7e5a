use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TTL: u32 = 3600;
pub const DEFAULT_URGENCY: &str = "normal";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where the subscriptions live. `connection_timeout` is in milliseconds.
#[derive(Clone, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub connection_timeout: u64,
    pub database: String,
    pub collection: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DbConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout)
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connection_timeout", &self.connection_timeout)
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// VAPID claims as written in the claims file. Everything besides `sub` is
/// forwarded into the JWT untouched, except `aud` which is always derived
/// from the endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct VapidClaims {
    pub sub: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationContent {
    pub icon: String,
    pub badge: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub ttl: u32,
    pub urgency: String,
    pub require_interaction: bool,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            urgency: DEFAULT_URGENCY.to_string(),
            require_interaction: false,
        }
    }
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
