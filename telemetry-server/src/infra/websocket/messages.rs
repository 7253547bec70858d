use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, close_code};
use chrono::{DateTime, Utc};
use serde::Serialize;
use telemetry_core::{BroadcastEvent, SessionId, TelemetryRecord};

/// Frames the server pushes to a live viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame after the upgrade.
    Welcome {
        /// The viewer's hub session.
        session_id: SessionId,
    },
    /// A newly stored record that passed the viewer's live filter.
    Record {
        /// Hub-assigned, strictly increasing.
        sequence: u64,
        /// When the hub fanned the record out.
        published_at: DateTime<Utc>,
        /// The stored record.
        record: Arc<TelemetryRecord>,
    },
}

impl ServerFrame {
    /// The greeting that carries the session id.
    pub fn welcome(session_id: SessionId) -> Self {
        ServerFrame::Welcome { session_id }
    }
}

impl From<&BroadcastEvent> for ServerFrame {
    fn from(event: &BroadcastEvent) -> Self {
        ServerFrame::Record {
            sequence: event.sequence,
            published_at: event.published_at,
            record: Arc::clone(&event.record),
        }
    }
}

/// Convert a frame to a WebSocket text message
pub fn frame_to_websocket(frame: &ServerFrame) -> Result<Message> {
    let json = serde_json::to_string(frame)?;
    Ok(Message::Text(Utf8Bytes::from(json)))
}

/// Close frame sent to a viewer that fell behind.
pub fn slow_consumer_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: Utf8Bytes::from_static("slow consumer"),
    }))
}

/// Close frame sent when the server is shutting down.
pub fn going_away_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: Utf8Bytes::from_static("server shutting down"),
    }))
}

/// Close frame sent to a viewer that stopped answering pings.
pub fn idle_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static("idle timeout"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    #[test]
    fn record_frame_shape() {
        let event = BroadcastEvent {
            sequence: 7,
            published_at: Utc::now(),
            record: Arc::new(TelemetryRecord {
                id: 3,
                value: "temp=42".into(),
                arch: "arm64".into(),
                captured_at: Utc::now(),
                metadata: BTreeMap::new(),
            }),
        };

        let Message::Text(text) = frame_to_websocket(&ServerFrame::from(&event)).unwrap() else {
            panic!("expected a text frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "record");
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["record"]["id"], 3);
        assert_eq!(value["record"]["value"], "temp=42");
    }

    #[test]
    fn welcome_frame_carries_session_id() {
        let id = SessionId::new();
        let Message::Text(text) = frame_to_websocket(&ServerFrame::welcome(id)).unwrap() else {
            panic!("expected a text frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value, json!({ "type": "welcome", "session_id": id.to_string() }));
    }

    #[test]
    fn eviction_closes_with_policy_code() {
        let Message::Close(Some(frame)) = slow_consumer_close() else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, 1008);
        assert_eq!(frame.reason.as_str(), "slow consumer");
    }
}
