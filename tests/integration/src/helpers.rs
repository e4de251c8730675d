//! Test helpers for integration tests
//!
//! Provides a gateway spawner bound to an ephemeral port, clients for either
//! transport, and a recorder for disconnect notifications.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use relay_common::Protocol;
use relay_gateway::{
    Agent, Client, ClientOptions, DefaultService, Dialer, MessageListener, RelayResult, Server,
    ServerOptions, StateListener, TcpDialer, WsDialer,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Suffix the echo listener appends to every payload
pub const ECHO_SUFFIX: &str = " from server ";

/// Replies to every payload with the payload plus [`ECHO_SUFFIX`]
pub struct EchoListener;

#[async_trait]
impl MessageListener for EchoListener {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Vec<u8>) {
        let mut reply = payload;
        reply.extend_from_slice(ECHO_SUFFIX.as_bytes());
        let _ = agent.push(reply).await;
    }
}

/// Forwards every disconnect to the test
pub struct DisconnectRecorder {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl StateListener for DisconnectRecorder {
    async fn disconnect(&self, id: &str) -> RelayResult<()> {
        let _ = self.tx.send(id.to_string());
        Ok(())
    }
}

/// Gateway instance that manages lifecycle
pub struct TestGateway {
    pub addr: SocketAddr,
    pub protocol: Protocol,
    pub server: Server,
    disconnects: Mutex<mpsc::UnboundedReceiver<String>>,
    _handle: JoinHandle<()>,
}

impl TestGateway {
    /// Start a gateway with default options
    pub async fn start(protocol: Protocol) -> Result<Self> {
        Self::start_with_options(protocol, ServerOptions::default()).await
    }

    /// Start a gateway with custom timeouts
    pub async fn start_with_options(protocol: Protocol, options: ServerOptions) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let server = Server::builder(addr.to_string())
            .service(DefaultService::new("gateway-test", "gateway").with_protocol(protocol))
            .options(options)
            .message_listener(Arc::new(EchoListener))
            .state_listener(Arc::new(DisconnectRecorder { tx }))
            .build()?;

        let serving = server.clone();
        let handle = tokio::spawn(async move {
            serving.serve(listener).await.ok();
        });

        Ok(Self {
            addr,
            protocol,
            server,
            disconnects: Mutex::new(rx),
            _handle: handle,
        })
    }

    /// Address a client dials
    pub fn dial_address(&self) -> String {
        match self.protocol {
            Protocol::Ws => format!("ws://{}/", self.addr),
            Protocol::Tcp => self.addr.to_string(),
        }
    }

    /// Base URL for HTTP requests against a WebSocket gateway
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(client.get(format!("{}{}", self.base_url(), path)).send().await?)
    }

    /// Build a client with the dialer matching this gateway's protocol
    pub fn client(&self, id: &str, options: ClientOptions) -> Client {
        let dialer: Arc<dyn Dialer> = match self.protocol {
            Protocol::Ws => Arc::new(WsDialer),
            Protocol::Tcp => Arc::new(TcpDialer),
        };
        Client::new(id, "client", dialer, options.with_dial_timeout(Duration::from_secs(5)))
    }

    /// Connect a client and wait until the gateway has registered it
    pub async fn connect(&self, id: &str, options: ClientOptions) -> Result<Client> {
        let client = self.client(id, options);
        client.connect(&self.dial_address()).await?;
        self.wait_registered(id).await?;
        Ok(client)
    }

    /// Poll the registry until `id` shows up
    pub async fn wait_registered(&self, id: &str) -> Result<()> {
        let channels = self.server.channels();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !channels.contains(id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        Ok(())
    }

    /// Next disconnect notification, if one arrives within `within`
    pub async fn next_disconnect(&self, within: Duration) -> Option<String> {
        let mut rx = self.disconnects.lock().await;
        tokio::time::timeout(within, rx.recv()).await.ok().flatten()
    }
}

/// Client options with the heartbeat switched off
pub fn quiet_client() -> ClientOptions {
    ClientOptions::default().with_heartbeat(Duration::ZERO)
}
