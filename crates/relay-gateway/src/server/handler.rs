//! WebSocket upgrade handler

use super::Server;
use crate::transport::websocket;
use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

/// Upgrade the request and hand the socket to the accept path
pub async fn ws_handler(State(server): State<Server>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        server.handle_conn(websocket::server_conn(socket)).await;
    })
}
