//! `HubActor` - the dispatch loop.
//!
//! One `HubActor` runs per process. It is the only task that reads or
//! writes the room registry; everything else talks to it through a
//! [`HubHandle`]. Register, unregister and broadcast events share one
//! bounded mailbox and are handled strictly one at a time.
//!
//! # Broadcast
//!
//! 1. Unprocessed events go through the [`MessageProcessor`]; `None` drops
//!    the event.
//! 2. The payload is offered to every connection in the room with
//!    `try_send`. A full or closed queue evicts that connection instead of
//!    stalling the loop.
//! 3. Events processed here (not relayed, not from the bus) are published
//!    through the [`FanoutBridge`] if one is configured.
//!
//! Processing and publishing are awaited inline, so a slow store or bus
//! delays every room on this instance.

use super::event::BroadcastEvent;
use super::messages::{ConnectionId, HubMessage, HubStatus, Registration};
use super::metrics::HubMetrics;
use crate::config::EvictionNotice;
use crate::errors::HubError;
use crate::fanout::FanoutBridge;
use crate::observability::metrics as prom;
use crate::processor::MessageProcessor;
use crate::protocol::OutboundMessage;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Dispatch loop settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub hub_id: String,
    pub mailbox_capacity: usize,
    pub eviction_notice: EvictionNotice,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_id: "hub-local".to_string(),
            mailbox_capacity: crate::config::DEFAULT_HUB_MAILBOX_CAPACITY,
            eviction_notice: EvictionNotice::None,
        }
    }
}

/// Handle to the `HubActor`.
///
/// Cheap to clone. All methods fail with `HubError::HubUnavailable` once
/// the loop has stopped.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
}

impl HubHandle {
    /// Spawn the dispatch loop and return a handle to it.
    #[must_use]
    pub fn spawn(
        config: HubConfig,
        processor: Arc<dyn MessageProcessor>,
        fanout: Option<Arc<FanoutBridge>>,
        metrics: Arc<HubMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity.max(1));
        let cancel_token = CancellationToken::new();

        prom::set_fanout_enabled(fanout.is_some());

        let actor = HubActor {
            hub_id: config.hub_id,
            eviction_notice: config.eviction_notice,
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            connection_rooms: HashMap::new(),
            processor,
            fanout,
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    async fn send(&self, message: HubMessage) -> Result<(), HubError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| HubError::HubUnavailable)
    }

    /// Add a connection to a room.
    pub async fn register(&self, registration: Registration) -> Result<(), HubError> {
        self.send(HubMessage::Register(registration)).await
    }

    /// Remove a connection. Removing an unknown connection is a no-op.
    pub async fn unregister(
        &self,
        room_id: String,
        connection_id: ConnectionId,
    ) -> Result<(), HubError> {
        self.send(HubMessage::Unregister {
            room_id,
            connection_id,
        })
        .await
    }

    /// Queue an event for dispatch.
    pub async fn broadcast(&self, event: BroadcastEvent) -> Result<(), HubError> {
        self.send(HubMessage::Broadcast(event)).await
    }

    pub async fn get_status(&self) -> Result<HubStatus, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::GetStatus { respond_to: tx }).await?;
        rx.await.map_err(|_| HubError::HubUnavailable)
    }

    /// Number of connections registered in `room_id` (0 if none).
    pub async fn room_size(&self, room_id: impl Into<String>) -> Result<usize, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubMessage::RoomSize {
            room_id: room_id.into(),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| HubError::HubUnavailable)
    }

    /// Stop the loop. Every registered connection loses its outbound queue.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child of the hub's root token, for tasks that must stop with it.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct RoomMember {
    user_id: String,
    outbound: mpsc::Sender<Bytes>,
}

/// A connection removed during delivery.
struct Eviction {
    connection_id: ConnectionId,
    user_id: String,
    reason: &'static str,
}

/// The dispatch loop state.
pub struct HubActor {
    hub_id: String,
    eviction_notice: EvictionNotice,
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    /// room id -> connections in that room
    rooms: HashMap<String, HashMap<ConnectionId, RoomMember>>,
    /// connection id -> room id
    connection_rooms: HashMap<ConnectionId, String>,
    processor: Arc<dyn MessageProcessor>,
    fanout: Option<Arc<FanoutBridge>>,
    metrics: Arc<HubMetrics>,
}

impl HubActor {
    #[instrument(skip_all, name = "chat.hub", fields(hub_id = %self.hub_id))]
    async fn run(mut self) {
        info!(
            target: "chat.hub",
            hub_id = %self.hub_id,
            fanout_enabled = self.fanout.is_some(),
            "Hub started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(target: "chat.hub", hub_id = %self.hub_id, "Hub received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(target: "chat.hub", hub_id = %self.hub_id, "Hub mailbox closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        let connections = self.connection_rooms.len();
        self.rooms.clear();
        self.connection_rooms.clear();
        prom::set_rooms_active(0);

        info!(
            target: "chat.hub",
            hub_id = %self.hub_id,
            connections_closed = connections,
            events_dispatched = self.metrics.events_dispatched(),
            "Hub stopped"
        );
    }

    async fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register(registration) => self.register(registration),
            HubMessage::Unregister {
                room_id,
                connection_id,
            } => self.unregister(&room_id, connection_id),
            HubMessage::Broadcast(event) => self.broadcast(event).await,
            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            HubMessage::RoomSize {
                room_id,
                respond_to,
            } => {
                let size = self.rooms.get(&room_id).map_or(0, HashMap::len);
                let _ = respond_to.send(size);
            }
        }
    }

    fn register(&mut self, registration: Registration) {
        let Registration {
            connection_id,
            room_id,
            user_id,
            outbound,
        } = registration;

        // A connection lives in exactly one room.
        if let Some(previous_room) = self.connection_rooms.get(&connection_id).cloned() {
            if previous_room != room_id {
                self.remove_member(&previous_room, connection_id);
            }
        }

        debug!(
            target: "chat.hub",
            room_id = %room_id,
            user_id = %user_id,
            connection_id = %connection_id,
            "Connection registered"
        );

        self.rooms
            .entry(room_id.clone())
            .or_default()
            .insert(connection_id, RoomMember { user_id, outbound });
        self.connection_rooms.insert(connection_id, room_id);
        prom::set_rooms_active(self.rooms.len());
    }

    fn unregister(&mut self, room_id: &str, connection_id: ConnectionId) {
        // The index is authoritative; the caller's room id is only a hint.
        let Some(registered_room) = self.connection_rooms.get(&connection_id).cloned() else {
            return;
        };

        if registered_room != room_id {
            debug!(
                target: "chat.hub",
                room_id = %room_id,
                registered_room_id = %registered_room,
                connection_id = %connection_id,
                "Unregister named a different room than the registry"
            );
        }

        if self.remove_member(&registered_room, connection_id).is_some() {
            debug!(
                target: "chat.hub",
                room_id = %registered_room,
                connection_id = %connection_id,
                "Connection unregistered"
            );
        }
    }

    /// Drop a member (closing its outbound queue) and prune an empty room.
    fn remove_member(&mut self, room_id: &str, connection_id: ConnectionId) -> Option<RoomMember> {
        self.connection_rooms.remove(&connection_id);

        let members = self.rooms.get_mut(room_id)?;
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            self.rooms.remove(room_id);
        }
        prom::set_rooms_active(self.rooms.len());
        removed
    }

    async fn broadcast(&mut self, event: BroadcastEvent) {
        let event = if event.needs_processing() {
            match self.processor.process(event).await {
                Some(processed) => processed,
                None => {
                    self.metrics.record_processor_drop();
                    return;
                }
            }
        } else {
            event
        };

        let (delivered, evictions) = self.deliver(&event.room_id, &event.message);
        self.metrics.record_dispatch(event.from_bus, delivered);

        if !evictions.is_empty() {
            self.notify_evictions(&event.room_id, &evictions);
        }

        if !event.is_publishable() {
            return;
        }

        if let Some(fanout) = &self.fanout {
            if let Err(e) = fanout.publish(&event).await {
                warn!(
                    target: "chat.hub",
                    room_id = %event.room_id,
                    error = %e,
                    "Failed to publish event to bus"
                );
            }
        }
    }

    /// Offer `payload` to every connection in the room.
    ///
    /// Returns the number of successful enqueues and the connections that
    /// were evicted because their queue was full or already closed.
    fn deliver(&mut self, room_id: &str, payload: &Bytes) -> (usize, Vec<Eviction>) {
        let Some(members) = self.rooms.get(room_id) else {
            return (0, Vec::new());
        };

        let mut delivered = 0;
        let mut evictions = Vec::new();
        for (connection_id, member) in members {
            match member.outbound.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => evictions.push(Eviction {
                    connection_id: *connection_id,
                    user_id: member.user_id.clone(),
                    reason: "queue_full",
                }),
                Err(TrySendError::Closed(_)) => evictions.push(Eviction {
                    connection_id: *connection_id,
                    user_id: member.user_id.clone(),
                    reason: "closed",
                }),
            }
        }

        for eviction in &evictions {
            self.remove_member(room_id, eviction.connection_id);
            self.metrics.record_eviction(eviction.reason);
            warn!(
                target: "chat.hub",
                room_id = %room_id,
                user_id = %eviction.user_id,
                connection_id = %eviction.connection_id,
                reason = eviction.reason,
                "Connection evicted during delivery"
            );
        }

        (delivered, evictions)
    }

    /// Tell the rest of the room about slow consumers that were dropped.
    ///
    /// Notices are local only. Connections that cannot take a notice are
    /// evicted without a further notice.
    fn notify_evictions(&mut self, room_id: &str, evictions: &[Eviction]) {
        if self.eviction_notice != EvictionNotice::UserLeft {
            return;
        }

        for eviction in evictions.iter().filter(|e| e.reason == "queue_full") {
            let notice = OutboundMessage::user_left(room_id, &eviction.user_id);
            match serde_json::to_vec(&notice) {
                Ok(bytes) => {
                    let _ = self.deliver(room_id, &Bytes::from(bytes));
                }
                Err(e) => {
                    warn!(target: "chat.hub", error = %e, "Failed to encode leave notice");
                }
            }
        }
    }

    fn status(&self) -> HubStatus {
        HubStatus {
            room_count: self.rooms.len(),
            connection_count: self.connection_rooms.len(),
            fanout_enabled: self.fanout.is_some(),
            events_dispatched: self.metrics.events_dispatched(),
        }
    }
}
