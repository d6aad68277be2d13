//! The unit of work flowing through the dispatch loop.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One message to process, deliver and possibly fan out.
///
/// `source_user_id` doubles as the "needs processing" marker: a non-empty
/// value means the payload is still the raw client frame. The processor
/// clears it once the payload has been persisted and rewritten.
///
/// On the bus this serializes as
/// `{"room_id","message","source_user_id","from_bus","origin_hub"}` with
/// `message` base64-encoded. The PascalCase field names used by older hub builds
/// are accepted on ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(alias = "RoomID")]
    pub room_id: String,

    #[serde(alias = "Message", with = "base64_bytes")]
    pub message: Bytes,

    #[serde(default, alias = "UserID")]
    pub source_user_id: String,

    #[serde(default, alias = "FromRedis")]
    pub from_bus: bool,

    /// Id of the hub that published this event. Only set on the bus.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin_hub: String,
}

impl BroadcastEvent {
    /// Event for a raw frame read from a client connection.
    #[must_use]
    pub fn from_client(room_id: impl Into<String>, user_id: impl Into<String>, frame: Bytes) -> Self {
        Self {
            room_id: room_id.into(),
            message: frame,
            source_user_id: user_id.into(),
            from_bus: false,
            origin_hub: String::new(),
        }
    }

    /// Event whose payload is already final and must not be processed again.
    #[must_use]
    pub fn processed(room_id: impl Into<String>, payload: Bytes) -> Self {
        Self {
            room_id: room_id.into(),
            message: payload,
            source_user_id: String::new(),
            from_bus: false,
            origin_hub: String::new(),
        }
    }

    /// Whether the processor still has to run on this event.
    #[must_use]
    pub fn needs_processing(&self) -> bool {
        !self.source_user_id.is_empty()
    }

    /// Whether this event may be published to the bus.
    ///
    /// Only events processed on this instance qualify. Anything received
    /// from the bus, or relayed without processing, stays local.
    #[must_use]
    pub fn is_publishable(&self) -> bool {
        self.source_user_id.is_empty() && !self.from_bus
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_needs_processing_and_is_not_publishable() {
        let event = BroadcastEvent::from_client("r1", "u1", Bytes::from_static(b"{}"));
        assert!(event.needs_processing());
        assert!(!event.is_publishable());
    }

    #[test]
    fn test_processed_event_is_publishable_until_it_comes_from_bus() {
        let mut event = BroadcastEvent::processed("r1", Bytes::from_static(b"{}"));
        assert!(!event.needs_processing());
        assert!(event.is_publishable());

        event.from_bus = true;
        assert!(!event.is_publishable());
    }

    #[test]
    fn test_bus_encoding_uses_base64_message() {
        let event = BroadcastEvent::processed("r1", Bytes::from_static(b"hi"));
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["room_id"], "r1");
        assert_eq!(json["message"], "aGk=");
        assert_eq!(json["source_user_id"], "");
        assert_eq!(json["from_bus"], false);
        assert!(json.get("origin_hub").is_none());
    }

    #[test]
    fn test_decodes_legacy_field_names() {
        let raw = br#"{"RoomID":"r9","Message":"aGk=","UserID":"","FromRedis":false}"#;
        let event: BroadcastEvent = serde_json::from_slice(raw).unwrap();

        assert_eq!(event.room_id, "r9");
        assert_eq!(event.message, Bytes::from_static(b"hi"));
        assert!(event.is_publishable());
    }

    #[test]
    fn test_rejects_non_base64_message() {
        let raw = br#"{"room_id":"r1","message":"%%%"}"#;
        assert!(serde_json::from_slice::<BroadcastEvent>(raw).is_err());
    }
}
