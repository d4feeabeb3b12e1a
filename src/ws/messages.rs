//! WebSocket frame types: inbound requests, acks, and pushed events.

use serde::{Deserialize, Serialize};

use crate::domain::WatcherEvent;
use crate::persistence::sqlite::format_timestamp;

/// Frame type for operation acknowledgements.
pub const WS_TYPE_ACK: &str = "ack";
/// Frame type for client heartbeats.
pub const WS_TYPE_HEARTBEAT: &str = "heartbeat";
/// Frame type for heartbeat acknowledgements.
pub const WS_TYPE_HEARTBEAT_ACK: &str = "heartbeat_ack";

/// Inbound request frame: correlation id, operation name, payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WsClientMessage {
    /// Client-chosen correlation id, echoed on the ack.
    #[serde(default)]
    pub id: String,
    /// Operation name, or `heartbeat`.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Client send timestamp; informational only.
    #[serde(default)]
    pub sent_at: String,
    /// Operation payload.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Outbound frame: ack, heartbeat ack, or unsolicited event push.
#[derive(Debug, Clone, Serialize)]
pub struct WsServerMessage {
    /// Frame type: `ack`, `heartbeat_ack`, or an event type name.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Correlation id of the request being acknowledged.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Operation outcome on ack frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// Error message on failed acks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Operation result or event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Server timestamp on heartbeat acks and event pushes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
}

impl WsServerMessage {
    /// Successful operation ack.
    #[must_use]
    pub fn ack(id: String, data: serde_json::Value) -> Self {
        Self {
            msg_type: WS_TYPE_ACK.to_string(),
            id,
            ok: Some(true),
            error: None,
            data: Some(data),
            at: None,
        }
    }

    /// Failed operation ack.
    #[must_use]
    pub fn error_ack(id: String, message: &str) -> Self {
        Self {
            msg_type: WS_TYPE_ACK.to_string(),
            id,
            ok: Some(false),
            error: Some(message.to_string()),
            data: None,
            at: None,
        }
    }

    /// Heartbeat acknowledgement.
    #[must_use]
    pub fn heartbeat_ack(id: String) -> Self {
        Self {
            msg_type: WS_TYPE_HEARTBEAT_ACK.to_string(),
            id,
            ok: None,
            error: None,
            data: None,
            at: Some(format_timestamp(chrono::Utc::now())),
        }
    }

    /// Unsolicited event push.
    #[must_use]
    pub fn event(event: &WatcherEvent) -> Self {
        Self {
            msg_type: event.event_type_str().to_string(),
            id: String::new(),
            ok: None,
            error: None,
            data: serde_json::to_value(event).ok(),
            at: Some(format_timestamp(event.observed_at())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn ack_frames_carry_outcome() {
        let ok = WsServerMessage::ack("req-1".to_string(), serde_json::json!({"success": true}));
        let Ok(json) = serde_json::to_string(&ok) else {
            panic!("serialize failed");
        };
        assert!(json.contains("\"ok\":true"));
        assert!(json.contains("req-1"));
        assert!(!json.contains("error"));

        let failed = WsServerMessage::error_ack("req-2".to_string(), "missing payload");
        let Ok(json) = serde_json::to_string(&failed) else {
            panic!("serialize failed");
        };
        assert!(json.contains("\"ok\":false"));
        assert!(json.contains("missing payload"));
    }

    #[test]
    fn empty_id_is_omitted() {
        let frame = WsServerMessage::heartbeat_ack(String::new());
        let Ok(json) = serde_json::to_string(&frame) else {
            panic!("serialize failed");
        };
        assert!(!json.contains("\"id\""));
        assert!(json.contains(WS_TYPE_HEARTBEAT_ACK));
    }

    #[test]
    fn client_frame_tolerates_missing_optionals() {
        let parsed: Result<WsClientMessage, _> =
            serde_json::from_str(r#"{"type": "receive-token"}"#);
        let Ok(parsed) = parsed else {
            panic!("parse failed");
        };
        assert_eq!(parsed.msg_type, "receive-token");
        assert!(parsed.id.is_empty());
        assert!(parsed.payload.is_none());
    }
}
