//! Gateway server
//!
//! Owns the channel registry and the injected collaborators, and runs the accept
//! loop for either transport.

mod handler;
mod options;
mod server;

pub use handler::ws_handler;
pub use options::{ServerOptions, DEFAULT_LOGIN_WAIT, DEFAULT_RW_WAIT};
pub use server::{Server, ServerBuilder};

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

/// Create the gateway router
pub fn create_router() -> Router<Server> {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_check))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Build the complete application
pub fn create_app(server: Server) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}
