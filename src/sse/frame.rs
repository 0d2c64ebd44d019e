//! Frames written to persistent client streams.

use axum::response::sse::Event;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

/// `event:` field of a stream frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    Notification,
    Heartbeat,
    ConnectionEstablished,
    ReplayGap,
    Shutdown,
}

impl StreamEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEventKind::Notification => "notification",
            StreamEventKind::Heartbeat => "heartbeat",
            StreamEventKind::ConnectionEstablished => "connection_established",
            StreamEventKind::ReplayGap => "replay_gap",
            StreamEventKind::Shutdown => "shutdown",
        }
    }
}

/// One text/event-stream message.
///
/// Notification frames carry the replay event ID in `id`, which browsers echo
/// back as `Last-Event-ID` on reconnect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub event: StreamEventKind,
    pub data: serde_json::Value,
}

impl StreamFrame {
    pub fn notification(event_id: u64, data: serde_json::Value) -> Self {
        Self {
            id: Some(event_id),
            event: StreamEventKind::Notification,
            data,
        }
    }

    pub fn heartbeat(connection_id: Uuid) -> Self {
        Self {
            id: None,
            event: StreamEventKind::Heartbeat,
            data: json!({
                "connectionId": connection_id,
                "timestamp": Utc::now(),
            }),
        }
    }

    pub fn connection_established(
        connection_id: Uuid,
        recipient_id: &str,
        heartbeat_interval_secs: u64,
    ) -> Self {
        Self {
            id: None,
            event: StreamEventKind::ConnectionEstablished,
            data: json!({
                "connectionId": connection_id,
                "userId": recipient_id,
                "heartbeatInterval": heartbeat_interval_secs,
                "timestamp": Utc::now(),
            }),
        }
    }

    /// Sent before replayed events when some events after the client's cursor were evicted
    pub fn replay_gap(last_event_id: u64, first_replayed_id: Option<u64>) -> Self {
        Self {
            id: None,
            event: StreamEventKind::ReplayGap,
            data: json!({
                "lastEventId": last_event_id,
                "firstAvailableId": first_replayed_id,
                "timestamp": Utc::now(),
            }),
        }
    }

    pub fn shutdown(reason: &str, reconnect_after_seconds: u64) -> Self {
        Self {
            id: None,
            event: StreamEventKind::Shutdown,
            data: json!({
                "reason": reason,
                "reconnectAfter": reconnect_after_seconds,
                "timestamp": Utc::now(),
            }),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.event == StreamEventKind::Notification
    }

    pub fn to_sse_event(&self) -> Event {
        let event = Event::default()
            .event(self.event.as_str())
            .data(self.data.to_string());
        match self.id {
            Some(id) => event.id(id.to_string()),
            None => event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_frame_carries_id() {
        let frame = StreamFrame::notification(42, json!({"title": "Hi"}));
        assert_eq!(frame.id, Some(42));
        assert!(frame.is_notification());

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "notification");
        assert_eq!(json["id"], 42);
    }

    #[test]
    fn test_heartbeat_frame_has_no_id() {
        let connection_id = Uuid::new_v4();
        let frame = StreamFrame::heartbeat(connection_id);
        assert!(frame.id.is_none());
        assert_eq!(frame.data["connectionId"], connection_id.to_string());

        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(json.contains(r#""event":"heartbeat""#));
    }

    #[test]
    fn test_replay_gap_frame() {
        let frame = StreamFrame::replay_gap(2, Some(7));
        assert!(frame.id.is_none());
        assert!(!frame.is_notification());
        assert_eq!(frame.event.as_str(), "replay_gap");
        assert_eq!(frame.data["lastEventId"], 2);
        assert_eq!(frame.data["firstAvailableId"], 7);

        let empty = StreamFrame::replay_gap(9, None);
        assert!(empty.data["firstAvailableId"].is_null());
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(StreamEventKind::ConnectionEstablished.as_str(), "connection_established");
        assert_eq!(
            serde_json::to_string(&StreamEventKind::ConnectionEstablished).unwrap(),
            "\"connection_established\""
        );
    }
}
