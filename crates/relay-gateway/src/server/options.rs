//! Server timeouts

use relay_common::TimeoutConfig;
use std::time::Duration;

/// Default budget for the login handshake
pub const DEFAULT_LOGIN_WAIT: Duration = Duration::from_secs(60);

/// Default read and write idle timeout for accepted channels
pub const DEFAULT_RW_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Passed to the acceptor; bounds the login frame read
    pub login_wait: Duration,
    /// Applied to every accepted channel before its read loop starts
    pub read_wait: Duration,
    pub write_wait: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            login_wait: DEFAULT_LOGIN_WAIT,
            read_wait: DEFAULT_RW_WAIT,
            write_wait: DEFAULT_RW_WAIT,
        }
    }
}

impl ServerOptions {
    pub fn with_login_wait(mut self, wait: Duration) -> Self {
        self.login_wait = wait;
        self
    }

    /// Set both the read and the write timeout
    pub fn with_rw_wait(mut self, wait: Duration) -> Self {
        self.read_wait = wait;
        self.write_wait = wait;
        self
    }

    pub fn with_read_wait(mut self, wait: Duration) -> Self {
        self.read_wait = wait;
        self
    }

    pub fn with_write_wait(mut self, wait: Duration) -> Self {
        self.write_wait = wait;
        self
    }
}

impl From<&TimeoutConfig> for ServerOptions {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            login_wait: config.login_wait(),
            read_wait: config.read_wait(),
            write_wait: config.write_wait(),
        }
    }
}
