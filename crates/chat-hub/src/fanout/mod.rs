//! Cross-instance fanout over a pub/sub bus.
//!
//! Every hub instance publishes the events it processed itself on a
//! per-room topic and subscribes to all room topics with one pattern
//! subscription. Events arriving from the bus are marked as such and never
//! published again, so a message crosses the bus at most once.
//!
//! Published events carry the publishing hub's id. The pattern subscription
//! also matches a hub's own publishes; those are dropped on ingest since
//! the hub already delivered them locally.
//!
//! ```text
//! instance A                     bus                     instance B
//! process -> deliver -> publish --> chat:room:{id} --> ingest -> deliver
//! ```
//!
//! The bridge is optional. Without it the hub serves its local rooms only.

pub mod redis;

use crate::errors::HubError;
use crate::hub::{BroadcastEvent, HubHandle, HubMetrics};
use crate::observability::metrics as prom;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use self::redis::RedisBus;

/// Prefix of every room topic.
pub const ROOM_TOPIC_PREFIX: &str = "chat:room:";

/// Pattern matching every room topic.
pub const ROOM_TOPIC_PATTERN: &str = "chat:room:*";

const RESUBSCRIBE_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Topic carrying events for `room_id`.
#[must_use]
pub fn room_topic(room_id: &str) -> String {
    format!("{ROOM_TOPIC_PREFIX}{room_id}")
}

/// Inverse of [`room_topic`]. `None` for foreign topics or an empty room id.
#[must_use]
pub fn room_id_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(ROOM_TOPIC_PREFIX)
        .filter(|room_id| !room_id.is_empty())
}

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Minimal pub/sub surface the bridge needs.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), HubError>;

    /// Subscribe to every topic matching `pattern`.
    ///
    /// The stream ends when the underlying subscription is lost.
    async fn subscribe_pattern(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, BusMessage>, HubError>;
}

/// Translates hub events to and from bus messages.
pub struct FanoutBridge {
    bus: Arc<dyn Bus>,
    hub_id: String,
    publish_timeout: Duration,
    metrics: Arc<HubMetrics>,
}

impl FanoutBridge {
    #[must_use]
    pub fn new(
        bus: Arc<dyn Bus>,
        hub_id: impl Into<String>,
        publish_timeout: Duration,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            bus,
            hub_id: hub_id.into(),
            publish_timeout,
            metrics,
        }
    }

    /// Publish a locally processed event on its room topic.
    ///
    /// The caller decides eligibility; this only encodes and sends.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Serialization` or `HubError::Bus` (including
    /// timeouts). Outcomes are counted either way.
    #[instrument(skip_all, name = "chat.fanout.publish", fields(room_id = %event.room_id))]
    pub async fn publish(&self, event: &BroadcastEvent) -> Result<(), HubError> {
        let mut wire = event.clone();
        wire.origin_hub.clone_from(&self.hub_id);
        let payload = Bytes::from(serde_json::to_vec(&wire)?);
        let topic = room_topic(&event.room_id);
        let started = Instant::now();

        let result = match tokio::time::timeout(self.publish_timeout, self.bus.publish(&topic, payload)).await {
            Ok(result) => result,
            Err(_) => {
                prom::record_bus_publish("timeout", started.elapsed());
                self.metrics.record_publish(false);
                return Err(HubError::Bus(format!(
                    "publish timed out after {}ms",
                    self.publish_timeout.as_millis()
                )));
            }
        };

        let status = if result.is_ok() { "success" } else { "error" };
        prom::record_bus_publish(status, started.elapsed());
        self.metrics.record_publish(result.is_ok());
        result
    }

    /// Turn a bus message into an event for local delivery.
    ///
    /// The topic is authoritative for the room. The returned event is marked
    /// as coming from the bus and as already processed, so the hub neither
    /// runs the processor on it nor publishes it again.
    pub fn ingest(&self, topic: &str, payload: &[u8]) -> Option<BroadcastEvent> {
        let Some(room_id) = room_id_from_topic(topic) else {
            warn!(target: "chat.fanout", topic = %topic, "Ignoring message on unexpected topic");
            prom::record_bus_event_received("rejected");
            return None;
        };

        let mut event: BroadcastEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(target: "chat.fanout", room_id = %room_id, error = %e, "Ignoring undecodable bus message");
                prom::record_bus_event_received("rejected");
                return None;
            }
        };

        // Payloads without an origin predate origin stamping and are always remote
        if !event.origin_hub.is_empty() && event.origin_hub == self.hub_id {
            prom::record_bus_event_received("own");
            return None;
        }

        if event.room_id != room_id {
            debug!(
                target: "chat.fanout",
                topic_room_id = %room_id,
                payload_room_id = %event.room_id,
                "Room id in payload disagrees with topic; using topic"
            );
            room_id.clone_into(&mut event.room_id);
        }
        event.from_bus = true;
        event.source_user_id.clear();

        prom::record_bus_event_received("accepted");
        self.metrics.record_bus_received();
        Some(event)
    }

    /// Feed bus messages into the hub until `cancel` fires.
    ///
    /// Re-subscribes with exponential backoff whenever the subscription
    /// fails or its stream ends. Stops early if the hub is gone.
    pub async fn run_subscriber(self: Arc<Self>, hub: HubHandle, cancel: CancellationToken) {
        let mut backoff = RESUBSCRIBE_INITIAL_BACKOFF;

        loop {
            let subscribed = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.bus.subscribe_pattern(ROOM_TOPIC_PATTERN) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(target: "chat.fanout", pattern = ROOM_TOPIC_PATTERN, "Bus subscription active");
                    backoff = RESUBSCRIBE_INITIAL_BACKOFF;

                    loop {
                        let next = tokio::select! {
                            () = cancel.cancelled() => return,
                            next = stream.next() => next,
                        };

                        let Some(message) = next else {
                            warn!(target: "chat.fanout", "Bus subscription ended");
                            break;
                        };

                        if let Some(event) = self.ingest(&message.topic, &message.payload) {
                            if hub.broadcast(event).await.is_err() {
                                info!(target: "chat.fanout", "Hub stopped, ending bus subscriber");
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        target: "chat.fanout",
                        error = %e,
                        retry_in_ms = backoff.as_millis(),
                        "Bus subscription failed"
                    );
                }
            }

            prom::record_bus_resubscribe();
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(RESUBSCRIBE_MAX_BACKOFF);
        }

        info!(target: "chat.fanout", "Bus subscriber stopped");
    }

    /// Spawn [`Self::run_subscriber`] on the runtime.
    pub fn spawn_subscriber(
        self: &Arc<Self>,
        hub: HubHandle,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_subscriber(hub, cancel))
    }
}
