//! Dial strategies
//!
//! A dialer opens the transport and performs the login handshake: the client id
//! is sent as the first binary frame, which is what [`DefaultAcceptor`] expects.
//!
//! [`DefaultAcceptor`]: crate::listener::DefaultAcceptor

use crate::error::{RelayError, RelayResult};
use crate::protocol::OpCode;
use crate::transport::{tcp, websocket, Conn};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Everything a dialer needs to reach and log into a gateway
#[derive(Debug, Clone)]
pub struct DialerContext {
    pub id: String,
    pub name: String,
    pub address: String,
    pub timeout: Duration,
}

#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `ctx.address` and authenticate, all within `ctx.timeout`
    async fn dial_and_handshake(&self, ctx: &DialerContext) -> RelayResult<Conn>;
}

/// Send the login frame with the remaining dial budget as write deadline
async fn handshake(conn: &mut Conn, ctx: &DialerContext, deadline: Instant) -> RelayResult<()> {
    conn.set_write_deadline(Some(deadline));
    conn.write_frame(OpCode::Binary, ctx.id.as_bytes()).await?;
    conn.flush().await?;
    conn.set_write_deadline(None);
    Ok(())
}

/// Dials the length-prefixed TCP transport; accepts `host:port` or `tcp://host:port`
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial_and_handshake(&self, ctx: &DialerContext) -> RelayResult<Conn> {
        tracing::debug!(id = %ctx.id, address = %ctx.address, "Dialing tcp");
        let deadline = Instant::now() + ctx.timeout;
        let address = ctx.address.strip_prefix("tcp://").unwrap_or(&ctx.address);

        let stream = tokio::time::timeout_at(deadline, TcpStream::connect(address))
            .await
            .map_err(|_| RelayError::Timeout)?
            .map_err(|e| RelayError::Dial(format!("{address}: {e}")))?;

        let mut conn = tcp::conn(stream);
        handshake(&mut conn, ctx, deadline).await?;
        Ok(conn)
    }
}

/// Dials the WebSocket transport; expects a `ws://` or `wss://` URL
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial_and_handshake(&self, ctx: &DialerContext) -> RelayResult<Conn> {
        tracing::debug!(id = %ctx.id, address = %ctx.address, "Dialing websocket");
        let deadline = Instant::now() + ctx.timeout;

        let (socket, _response) =
            tokio::time::timeout_at(deadline, tokio_tungstenite::connect_async(ctx.address.as_str()))
                .await
                .map_err(|_| RelayError::Timeout)?
                .map_err(|e| RelayError::Dial(format!("{}: {e}", ctx.address)))?;

        let mut conn = websocket::client_conn(socket);
        handshake(&mut conn, ctx, deadline).await?;
        Ok(conn)
    }
}
