//! WebSocket connection loop.
//!
//! Each connection registers a mailbox with the fan-out hub and then
//! multiplexes two directions: inbound request frames dispatched through
//! the shared operation dispatcher, and hub events pushed as unsolicited
//! frames. The mailbox is bounded; a connection too slow to drain it loses
//! events rather than slowing ingestion down.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use super::messages::{WS_TYPE_HEARTBEAT, WsClientMessage, WsServerMessage};
use crate::service::WatcherService;
use crate::service::dispatch::dispatch;

/// Runs the request/response + push loop for one WebSocket connection.
pub async fn run_connection(socket: WebSocket, service: Arc<WatcherService>) {
    let hub = service.event_hub().clone();
    let (subscriber_id, mut events) = hub.subscribe();

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Inbound frame from the client.
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let response = handle_frame(&service, &text).await;
                        let Ok(json) = serde_json::to_string(&response) else {
                            continue;
                        };
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(error)) => {
                        tracing::warn!(%error, "ws read failed");
                        break;
                    }
                    _ => {}
                }
            }
            // Event from the fan-out hub.
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let frame = WsServerMessage::event(&event);
                        let Ok(json) = serde_json::to_string(&frame) else {
                            continue;
                        };
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    hub.unsubscribe(subscriber_id);
    tracing::debug!(subscriber = %subscriber_id, "ws connection closed");
}

/// Handles one inbound frame, producing the ack to send back.
async fn handle_frame(service: &Arc<WatcherService>, text: &str) -> WsServerMessage {
    let Ok(request) = serde_json::from_str::<WsClientMessage>(text) else {
        return WsServerMessage::error_ack(String::new(), "malformed JSON");
    };

    let request_type = request.msg_type.trim();
    let request_id = request.id.trim().to_string();

    if request_type == WS_TYPE_HEARTBEAT {
        return WsServerMessage::heartbeat_ack(request_id);
    }
    if request_type.is_empty() {
        return WsServerMessage::error_ack(request_id, "missing type");
    }

    match dispatch(service, request_type, request.payload.as_ref()).await {
        Ok(data) => WsServerMessage::ack(request_id, data),
        Err(error) => {
            tracing::warn!(
                operation = request_type,
                id = %request_id,
                %error,
                "ws request failed"
            );
            WsServerMessage::error_ack(request_id, &error.public_message())
        }
    }
}
