//! Gateway accept loop
//!
//! Every accepted socket goes through the same path regardless of transport:
//! authenticate, refuse duplicates, register, run the read loop, then deregister
//! and report the disconnect.

use super::options::ServerOptions;
use crate::channel::{Channel, ChannelRegistry};
use crate::error::{GatewayError, GatewayResult, RelayError, RelayResult};
use crate::listener::{Acceptor, DefaultAcceptor, MessageListener, StateListener};
use crate::naming::DefaultService;
use crate::protocol::OpCode;
use crate::task::spawn_supervised;
use crate::transport::{tcp, Conn};
use relay_common::Protocol;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cheap-to-clone handle to a gateway server
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    listen: String,
    service: Arc<DefaultService>,
    options: ServerOptions,
    acceptor: Arc<dyn Acceptor>,
    message_listener: Arc<dyn MessageListener>,
    state_listener: Arc<dyn StateListener>,
    channels: Arc<ChannelRegistry>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn builder(listen: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(listen)
    }

    /// Address `start` binds
    pub fn listen(&self) -> &str {
        &self.inner.listen
    }

    /// Descriptor published to the naming service
    pub fn service(&self) -> Arc<DefaultService> {
        self.inner.service.clone()
    }

    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    /// Registry of channels hosted by this server
    pub fn channels(&self) -> Arc<ChannelRegistry> {
        self.inner.channels.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Bind the configured address without serving yet
    pub async fn bind(&self) -> GatewayResult<TcpListener> {
        TcpListener::bind(&self.inner.listen)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: self.inner.listen.clone(),
                source,
            })
    }

    /// Bind the configured address and serve until shutdown
    pub async fn start(&self) -> GatewayResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve the descriptor's protocol on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> GatewayResult<()> {
        match self.inner.service.protocol {
            Protocol::Tcp => self.serve_tcp(listener).await,
            Protocol::Ws => self.serve_ws(listener).await,
        }
    }

    /// Accept loop for the length-prefixed TCP transport
    pub async fn serve_tcp(&self, listener: TcpListener) -> GatewayResult<()> {
        let mut shutdown = self.inner.shutdown.subscribe();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, service_id = %self.inner.service.id, "TCP gateway listening");
        }

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => continue,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "TCP connection accepted");
                        let server = self.clone();
                        spawn_supervised("tcp-connection", async move {
                            server.handle_conn(tcp::conn(stream)).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept TCP connection");
                    }
                },
            }
        }

        tracing::info!("TCP gateway stopped");
        Ok(())
    }

    /// Serve the WebSocket endpoint and the health route
    pub async fn serve_ws(&self, listener: TcpListener) -> GatewayResult<()> {
        let mut shutdown = self.inner.shutdown.subscribe();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, service_id = %self.inner.service.id, "Gateway listening on ws://{}/", addr);
        }

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stopped| *stopped).await;
            })
            .await
            .map_err(|e| GatewayError::Server(e.to_string()))?;

        tracing::info!("WebSocket gateway stopped");
        Ok(())
    }

    /// Axum application for the WebSocket transport
    pub fn router(&self) -> axum::Router {
        super::create_app(self.clone())
    }

    /// Run one connection from login to disconnect
    pub async fn handle_conn(&self, mut conn: Conn) {
        let inner = &self.inner;

        let id = match inner.acceptor.accept(&mut conn, inner.options.login_wait).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Login rejected");
                self.reject(conn, &e.to_string()).await;
                return;
            }
        };

        if inner.channels.contains(&id) {
            let err = RelayError::DuplicateId(id);
            tracing::warn!(error = %err, "Login rejected");
            self.reject(conn, &err.to_string()).await;
            return;
        }

        let channel = Channel::new(id.clone(), conn);
        channel.set_read_wait(inner.options.read_wait);
        channel.set_write_wait(inner.options.write_wait);

        if !inner.channels.try_add(channel.clone()) {
            let err = RelayError::DuplicateId(id);
            tracing::warn!(error = %err, "Login rejected");
            channel.reject(&err.to_string()).await;
            return;
        }
        tracing::info!(channel_id = %id, "Channel connected");

        match channel.read_loop(inner.message_listener.clone()).await {
            Err(e) if e.is_timeout() => {
                tracing::info!(channel_id = %id, "Channel timed out");
            }
            Err(RelayError::RemoteClosed) => {
                tracing::info!(channel_id = %id, "Channel closed by peer");
            }
            Err(e) => {
                tracing::info!(channel_id = %id, error = %e, "Channel read loop ended");
            }
            Ok(()) => {}
        }

        inner.channels.remove_channel(&channel);
        if let Err(e) = inner.state_listener.disconnect(&id).await {
            tracing::warn!(channel_id = %id, error = %e, "State listener failed");
        }
        let _ = channel.close();
    }

    /// Send a close frame on a connection that never became a channel, then drop it
    async fn reject(&self, mut conn: Conn, reason: &str) {
        let wait = self.inner.options.write_wait;
        conn.set_write_deadline((!wait.is_zero()).then(|| Instant::now() + wait));

        let result = match conn.write_frame(OpCode::Close, reason.as_bytes()).await {
            Ok(()) => conn.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Failed to send close frame");
        }
        let _ = conn.close().await;
    }

    /// Queue `payload` on the local channel registered as `id`
    pub async fn push(&self, id: &str, payload: Vec<u8>) -> RelayResult<()> {
        let channel = self
            .inner
            .channels
            .get(id)
            .ok_or_else(|| RelayError::ChannelNotFound(id.to_string()))?;
        channel.push(payload).await
    }

    /// Stop accepting and close every registered channel
    pub async fn shutdown(&self) -> GatewayResult<()> {
        self.inner.shutdown.send_replace(true);

        let channels = self.inner.channels.all();
        tracing::info!(channels = channels.len(), "Shutting down gateway");
        for channel in channels {
            channel.close()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen", &self.inner.listen)
            .field("service", &self.inner.service)
            .field("options", &self.inner.options)
            .field("channels", &self.inner.channels)
            .finish()
    }
}

/// Builder for [`Server`]
///
/// The acceptor defaults to [`DefaultAcceptor`]; both listeners are required.
pub struct ServerBuilder {
    listen: String,
    service: Option<DefaultService>,
    options: ServerOptions,
    acceptor: Option<Arc<dyn Acceptor>>,
    message_listener: Option<Arc<dyn MessageListener>>,
    state_listener: Option<Arc<dyn StateListener>>,
    channels: Option<Arc<ChannelRegistry>>,
}

impl ServerBuilder {
    pub fn new(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            service: None,
            options: ServerOptions::default(),
            acceptor: None,
            message_listener: None,
            state_listener: None,
            channels: None,
        }
    }

    pub fn service(mut self, service: DefaultService) -> Self {
        self.service = Some(service);
        self
    }

    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn acceptor(mut self, acceptor: Arc<dyn Acceptor>) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    pub fn message_listener(mut self, listener: Arc<dyn MessageListener>) -> Self {
        self.message_listener = Some(listener);
        self
    }

    pub fn state_listener(mut self, listener: Arc<dyn StateListener>) -> Self {
        self.state_listener = Some(listener);
        self
    }

    /// Share an existing registry instead of creating one
    pub fn channels(mut self, channels: Arc<ChannelRegistry>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn build(self) -> GatewayResult<Server> {
        let (shutdown, _) = watch::channel(false);
        Ok(Server {
            inner: Arc::new(ServerInner {
                listen: self.listen,
                service: Arc::new(
                    self.service
                        .unwrap_or_else(|| DefaultService::new("gateway-1", "gateway")),
                ),
                options: self.options,
                acceptor: self.acceptor.unwrap_or_else(|| Arc::new(DefaultAcceptor)),
                message_listener: self
                    .message_listener
                    .ok_or(GatewayError::MissingCollaborator("message listener"))?,
                state_listener: self
                    .state_listener
                    .ok_or(GatewayError::MissingCollaborator("state listener"))?,
                channels: self.channels.unwrap_or_else(ChannelRegistry::new_shared),
                shutdown,
            }),
        })
    }
}
