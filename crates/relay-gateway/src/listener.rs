//! Collaborator hooks injected into the gateway
//!
//! The gateway guarantees delivery and ordering; what a payload means is up to
//! these implementations.

use crate::error::{RelayError, RelayResult};
use crate::transport::Conn;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The narrow view of a channel handed to message listeners
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    /// Queue a payload for the peer
    async fn push(&self, payload: Vec<u8>) -> RelayResult<()>;
}

/// Authentication hook, run once per accepted socket before a channel exists
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Read the handshake from `conn` and derive the connection id
    async fn accept(&self, conn: &mut Conn, timeout: Duration) -> RelayResult<String>;
}

/// Receives every non-empty inbound payload, each on its own task
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Vec<u8>);
}

/// Notified exactly once when a registered channel goes away
#[async_trait]
pub trait StateListener: Send + Sync {
    async fn disconnect(&self, id: &str) -> RelayResult<()>;
}

/// Treats the first frame's payload as the user id
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAcceptor;

#[async_trait]
impl Acceptor for DefaultAcceptor {
    async fn accept(&self, conn: &mut Conn, timeout: Duration) -> RelayResult<String> {
        if !timeout.is_zero() {
            conn.set_read_deadline(Some(Instant::now() + timeout));
        }
        let frame = conn.read_frame().await;
        conn.set_read_deadline(None);

        let id = String::from_utf8(frame?.into_payload())
            .map_err(|_| RelayError::InvalidCredentials("user id is not valid UTF-8".to_string()))?;
        if id.is_empty() {
            return Err(RelayError::InvalidCredentials("user id is invalid".to_string()));
        }
        Ok(id)
    }
}
