//! Message processing stage.
//!
//! The dispatch loop hands every unprocessed event to a [`MessageProcessor`]
//! before local delivery. The processor runs inline in the loop: a slow
//! store call delays delivery for every room on this instance.

use crate::hub::BroadcastEvent;
use crate::observability::metrics as prom;
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::repositories::MessageStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Message type recorded for chat text.
pub const TEXT_MESSAGE_TYPE: &str = "text";

/// Turns a raw client event into a deliverable one.
///
/// Returning `None` drops the event: nothing is delivered or published.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, event: BroadcastEvent) -> Option<BroadcastEvent>;
}

/// Persists `message` envelopes and relays every other kind unchanged.
pub struct ChatMessageProcessor {
    store: Arc<dyn MessageStore>,
}

impl ChatMessageProcessor {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    fn drop_event(reason: &'static str) -> Option<BroadcastEvent> {
        prom::record_processor_drop(reason);
        None
    }
}

#[async_trait]
impl MessageProcessor for ChatMessageProcessor {
    #[instrument(skip_all, name = "chat.processor.process", fields(room_id = %event.room_id))]
    async fn process(&self, event: BroadcastEvent) -> Option<BroadcastEvent> {
        let started = Instant::now();

        let inbound = match InboundMessage::parse(&event.message) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(target: "chat.processor", error = %e, "Dropping unparseable frame");
                return Self::drop_event("parse");
            }
        };

        let InboundMessage::Message { room_id, .. } = &inbound else {
            prom::record_processing_duration("relay", started.elapsed());
            return Some(event);
        };

        let Ok(user_id) = Uuid::parse_str(&event.source_user_id) else {
            debug!(target: "chat.processor", "Dropping message: invalid user id");
            return Self::drop_event("invalid_id");
        };

        let (Ok(room_id), Ok(connection_room)) =
            (Uuid::parse_str(room_id), Uuid::parse_str(&event.room_id))
        else {
            debug!(target: "chat.processor", "Dropping message: invalid room id");
            return Self::drop_event("invalid_id");
        };

        if room_id != connection_room {
            debug!(
                target: "chat.processor",
                payload_room_id = %room_id,
                "Dropping message: room does not match connection"
            );
            return Self::drop_event("room_mismatch");
        }

        let Some(content) = inbound.text_content() else {
            debug!(target: "chat.processor", "Dropping message: empty content");
            return Self::drop_event("empty");
        };

        let persisted = match self
            .store
            .create_message(room_id, user_id, content, TEXT_MESSAGE_TYPE)
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(
                    target: "chat.processor",
                    user_id = %user_id,
                    error = %e,
                    "Dropping message: store failed"
                );
                return Self::drop_event("store");
            }
        };

        let message_id = persisted.id;
        let payload = match serde_json::to_vec(&OutboundMessage::chat_message(persisted)) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(target: "chat.processor", error = %e, "Dropping message: encode failed");
                return Self::drop_event("encode");
            }
        };

        prom::record_processing_duration("message", started.elapsed());
        debug!(
            target: "chat.processor",
            message_id = %message_id,
            "Message persisted"
        );

        Some(BroadcastEvent::processed(event.room_id, payload))
    }
}
