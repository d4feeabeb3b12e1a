//! Axum WebSocket upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;

/// Inbound frames larger than this are rejected at the socket layer.
const WS_READ_LIMIT_BYTES: usize = 8 << 20;

/// `GET /ws` — Upgrade HTTP connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let service = std::sync::Arc::clone(&state.service);

    ws.max_message_size(WS_READ_LIMIT_BYTES)
        .on_upgrade(move |socket| run_connection(socket, service))
}
