use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ChatError;
use crate::ids::{MessageId, UserId};

/// Text carried by the synthetic frame sent when a peer disconnects.
pub const DISCONNECT_TEXT: &str = "Client disconnected";

/// A persisted chat event. Immutable once the store has assigned `id` and
/// `timestamp`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Wire representation used by the HTTP surface.
    pub fn view(&self) -> MessageView {
        MessageView::new(Some(self.id), self.sender_id, &self.content, self.timestamp)
    }

    /// Frame delivered to live connections.
    pub fn frame(&self) -> Frame {
        Frame {
            kind: FrameKind::Message,
            body: self.view(),
        }
    }
}

/// Serialized message fields.
///
/// `content` is canonical. `message` repeats it for clients that read the
/// legacy field name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub client_id: UserId,
    pub content: String,
    pub message: String,
    /// `HH:MM` in server-local time.
    pub time: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageView {
    fn new(id: Option<MessageId>, client_id: UserId, content: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            client_id,
            content: content.to_string(),
            message: content.to_string(),
            time: wall_clock(&timestamp),
            timestamp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Message,
    Disconnect,
}

/// One JSON text frame pushed to a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(flatten)]
    pub body: MessageView,
}

impl Frame {
    /// Transient notice that `client_id` left. Never persisted, so it has no id.
    pub fn disconnect(client_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            kind: FrameKind::Disconnect,
            body: MessageView::new(None, client_id, DISCONNECT_TEXT, at),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Format a timestamp as local `HH:MM`.
pub fn wall_clock(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M").to_string()
}

/// Check submitted text. Whitespace-only counts as empty; the text itself is
/// stored as sent.
pub fn validate_content(raw: &str, max_len: usize) -> Result<&str, ChatError> {
    if raw.trim().is_empty() {
        return Err(ChatError::validation("message content is empty"));
    }
    if raw.len() > max_len {
        return Err(ChatError::validation(format!(
            "message content is {} bytes, limit is {max_len}",
            raw.len()
        )));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Message {
        Message {
            id: MessageId::new(5),
            sender_id: UserId::new(2),
            content: "hello".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn message_frame_carries_both_text_fields() {
        let json: serde_json::Value = serde_json::from_str(&sample().frame().to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["id"], 5);
        assert_eq!(json["client_id"], 2);
        assert_eq!(json["content"], "hello");
        assert_eq!(json["message"], "hello");
        assert_eq!(json["time"].as_str().unwrap().len(), 5);
    }

    #[test]
    fn disconnect_frame_has_no_id() {
        let frame = Frame::disconnect(UserId::new(3), Utc::now());
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "disconnect");
        assert!(json.get("id").is_none());
        assert_eq!(json["client_id"], 3);
        assert_eq!(json["content"], DISCONNECT_TEXT);
    }

    #[test]
    fn frame_parses_back() {
        let frame = sample().frame();
        let back: Frame = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn wall_clock_is_hours_and_minutes() {
        let ts = Utc::now();
        let s = wall_clock(&ts);
        assert_eq!(s, ts.with_timezone(&Local).format("%H:%M").to_string());
        assert_eq!(s.as_bytes()[2], b':');
    }

    #[test]
    fn validate_rejects_empty_and_blank() {
        assert!(validate_content("", 100).is_err());
        assert!(validate_content("   \n", 100).is_err());
        assert_eq!(validate_content(" hi ", 100).unwrap(), " hi ");
    }

    #[test]
    fn validate_rejects_oversized() {
        let long = "x".repeat(11);
        let err = validate_content(&long, 10).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(validate_content(&"x".repeat(10), 10).is_ok());
    }
}
