//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub app: AppSettings,
    pub gateway: ServerConfig,
    pub service: ServiceConfig,
    pub timeouts: TimeoutConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Transport protocol spoken by a gateway listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    #[default]
    Ws,
}

impl Protocol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Ws => "ws",
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "ws" | "websocket" => Ok(Self::Ws),
            other => Err(ConfigError::InvalidValue("GATEWAY_PROTOCOL", other.to_string())),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Identity this node publishes to the naming service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_id")]
    pub id: String,
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub public_address: Option<String>,
    pub public_port: Option<u16>,
}

/// Per-connection idle timeouts, in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_login_wait")]
    pub login_wait_secs: u64,
    #[serde(default = "default_read_wait")]
    pub read_wait_secs: u64,
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,
}

impl TimeoutConfig {
    #[must_use]
    pub fn login_wait(&self) -> Duration {
        Duration::from_secs(self.login_wait_secs)
    }

    #[must_use]
    pub fn read_wait(&self) -> Duration {
        Duration::from_secs(self.read_wait_secs)
    }

    #[must_use]
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login_wait_secs: default_login_wait(),
            read_wait_secs: default_read_wait(),
            write_wait_secs: default_write_wait(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "relay".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_service_id() -> String {
    "gateway-1".to_string()
}

fn default_service_name() -> String {
    "gateway".to_string()
}

fn default_login_wait() -> u64 {
    60
}

fn default_read_wait() -> u64 {
    60
}

fn default_write_wait() -> u64 {
    10
}

/// Parse an optional variable, failing only when it is present but malformed
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `GATEWAY_PORT` is missing or any value fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| match s.to_lowercase().as_str() {
                        "production" => Some(Environment::Production),
                        "staging" => Some(Environment::Staging),
                        "development" => Some(Environment::Development),
                        _ => None,
                    })
                    .unwrap_or_default(),
            },
            gateway: ServerConfig {
                host: env::var("GATEWAY_HOST").unwrap_or_else(|_| default_host()),
                port: parse_var("GATEWAY_PORT")?.ok_or(ConfigError::MissingVar("GATEWAY_PORT"))?,
                protocol: parse_var("GATEWAY_PROTOCOL")?.unwrap_or_default(),
            },
            service: ServiceConfig {
                id: env::var("SERVICE_ID").unwrap_or_else(|_| default_service_id()),
                name: env::var("SERVICE_NAME").unwrap_or_else(|_| default_service_name()),
                namespace: env::var("SERVICE_NAMESPACE").unwrap_or_default(),
                public_address: env::var("PUBLIC_ADDRESS").ok().filter(|s| !s.is_empty()),
                public_port: parse_var("PUBLIC_PORT")?,
            },
            timeouts: TimeoutConfig {
                login_wait_secs: parse_var("LOGIN_WAIT_SECS")?.unwrap_or_else(default_login_wait),
                read_wait_secs: parse_var("READ_WAIT_SECS")?.unwrap_or_else(default_read_wait),
                write_wait_secs: parse_var("WRITE_WAIT_SECS")?.unwrap_or_else(default_write_wait),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
