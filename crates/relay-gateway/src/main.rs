//! Relay Gateway entry point
//!
//! Run with:
//! ```bash
//! GATEWAY_PORT=8000 cargo run -p relay-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use async_trait::async_trait;
use relay_common::{try_init_tracing, RelayConfig};
use relay_gateway::{
    Agent, Container, DefaultService, MemoryNaming, MessageListener, RelayResult, Server,
    ServerOptions, StateListener,
};
use std::sync::Arc;
use tracing::{error, info};

/// Replies to every payload with the payload plus a fixed suffix
struct EchoListener;

#[async_trait]
impl MessageListener for EchoListener {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Vec<u8>) {
        let mut reply = payload;
        reply.extend_from_slice(b" from server ");
        if let Err(e) = agent.push(reply).await {
            tracing::warn!(channel_id = %agent.id(), error = %e, "Echo failed");
        }
    }
}

struct LoggingStateListener;

#[async_trait]
impl StateListener for LoggingStateListener {
    async fn disconnect(&self, id: &str) -> RelayResult<()> {
        info!(channel_id = %id, "Disconnected");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %e, "Gateway failed to start");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting Relay Gateway...");

    let config = RelayConfig::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        env = ?config.app.env,
        address = %config.gateway.address(),
        protocol = %config.gateway.protocol,
        "Configuration loaded"
    );

    let server = Server::builder(config.gateway.address())
        .service(DefaultService::from(&config))
        .options(ServerOptions::from(&config.timeouts))
        .message_listener(Arc::new(EchoListener))
        .state_listener(Arc::new(LoggingStateListener))
        .build()?;

    let container = Container::new(server, MemoryNaming::new_shared());
    container.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    container.shutdown().await?;
    Ok(())
}
