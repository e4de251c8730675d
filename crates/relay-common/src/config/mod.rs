//! Configuration structs

mod relay_config;

pub use relay_config::{
    AppSettings, ConfigError, Environment, Protocol, RelayConfig, ServerConfig, ServiceConfig,
    TimeoutConfig,
};
