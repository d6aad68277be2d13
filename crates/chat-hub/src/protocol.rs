//! Client wire envelopes.
//!
//! Clients send JSON text frames tagged by `type`. Only `message` frames are
//! persisted; every other kind is relayed to the room byte-for-byte, so the
//! enum here is used for classification and never re-serialized.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope kind for persisted chat messages.
pub const KIND_MESSAGE: &str = "message";

/// Envelope kind for leave notices.
pub const KIND_LEAVE: &str = "leave";

/// Inbound client envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A chat message to persist and broadcast.
    Message {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
    Join,
    Leave,
    Typing,
    /// Any kind this server does not know about. Relayed unchanged.
    #[serde(other)]
    Other,
}

impl InboundMessage {
    /// Parse a raw client frame.
    ///
    /// # Errors
    ///
    /// Fails if the frame is not a JSON object with a string `type` field.
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Resolve the text body of a `message` envelope.
    ///
    /// `content` wins when non-empty; otherwise a string `payload` is used.
    /// Returns `None` for other kinds or when no non-empty text is present.
    #[must_use]
    pub fn text_content(&self) -> Option<&str> {
        let InboundMessage::Message {
            content, payload, ..
        } = self
        else {
            return None;
        };

        if let Some(text) = content.as_deref().filter(|c| !c.is_empty()) {
            return Some(text);
        }

        payload
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .filter(|p| !p.is_empty())
    }
}

/// A message row as stored by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Outbound server envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<PersistedMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl OutboundMessage {
    /// Envelope announcing a freshly persisted chat message.
    #[must_use]
    pub fn chat_message(message: PersistedMessage) -> Self {
        Self {
            kind: KIND_MESSAGE.to_string(),
            user_id: Some(message.user_id.to_string()),
            username: message.username.clone(),
            room_id: Some(message.room_id.to_string()),
            timestamp: Some(
                message
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            message: Some(message),
        }
    }

    /// Envelope telling a room that a user is gone.
    #[must_use]
    pub fn user_left(room_id: &str, user_id: &str) -> Self {
        Self {
            kind: KIND_LEAVE.to_string(),
            message: None,
            user_id: Some(user_id.to_string()),
            username: None,
            room_id: Some(room_id.to_string()),
            timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_with_content() {
        let msg = InboundMessage::parse(
            br#"{"type":"message","room_id":"r1","content":"hello"}"#,
        )
        .unwrap();

        assert!(matches!(msg, InboundMessage::Message { ref room_id, .. } if room_id == "r1"));
        assert_eq!(msg.text_content(), Some("hello"));
    }

    #[test]
    fn test_content_falls_back_to_string_payload() {
        let msg =
            InboundMessage::parse(br#"{"type":"message","room_id":"r1","payload":"hi there"}"#)
                .unwrap();
        assert_eq!(msg.text_content(), Some("hi there"));

        let msg = InboundMessage::parse(
            br#"{"type":"message","room_id":"r1","content":"","payload":{"text":"x"}}"#,
        )
        .unwrap();
        assert_eq!(msg.text_content(), None);
    }

    #[test]
    fn test_relay_kinds_and_unknown_kinds() {
        let typing =
            InboundMessage::parse(br#"{"type":"typing","room_id":"r1","payload":true}"#).unwrap();
        assert_eq!(typing, InboundMessage::Typing);
        assert_eq!(typing.text_content(), None);

        let join = InboundMessage::parse(
            br#"{"type":"join","room_id":"r1","user_id":"u1","payload":{"nick":"a"}}"#,
        )
        .unwrap();
        assert_eq!(join, InboundMessage::Join);
        assert_eq!(
            InboundMessage::parse(br#"{"type":"leave"}"#).unwrap(),
            InboundMessage::Leave
        );

        let other = InboundMessage::parse(br#"{"type":"reaction","emoji":"+1"}"#).unwrap();
        assert_eq!(other, InboundMessage::Other);
        assert_eq!(other.text_content(), None);
    }

    #[test]
    fn test_parse_failures() {
        assert!(InboundMessage::parse(b"not json").is_err());
        assert!(InboundMessage::parse(br#"{"room_id":"r1","content":"x"}"#).is_err());
        assert!(InboundMessage::parse(br#"["message"]"#).is_err());
    }

    #[test]
    fn test_chat_message_envelope_shape() {
        let created_at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let persisted = PersistedMessage {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            content: "hello".to_string(),
            message_type: "text".to_string(),
            created_at,
            username: Some("alice".to_string()),
        };

        let envelope = OutboundMessage::chat_message(persisted.clone());
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "message");
        assert_eq!(json["message"]["content"], "hello");
        assert_eq!(json["user_id"], persisted.user_id.to_string());
        assert_eq!(json["room_id"], persisted.room_id.to_string());
        assert_eq!(json["username"], "alice");
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00.000Z");
    }

    #[test]
    fn test_user_left_omits_absent_fields() {
        let json = serde_json::to_value(OutboundMessage::user_left("r1", "u1")).unwrap();

        assert_eq!(json["type"], "leave");
        assert_eq!(json["room_id"], "r1");
        assert_eq!(json["user_id"], "u1");
        assert!(json.get("message").is_none());
        assert!(json.get("username").is_none());
    }
}
