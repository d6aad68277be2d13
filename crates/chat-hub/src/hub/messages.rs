//! Messages accepted by the dispatch loop.
//!
//! Every kind of event travels over the same mailbox, so events sent by a
//! single producer are handled in the order they were sent.

use super::event::BroadcastEvent;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Identifies one live connection in the registry.
pub type ConnectionId = Uuid;

/// A connection asking to join a room.
#[derive(Debug)]
pub struct Registration {
    pub connection_id: ConnectionId,
    pub room_id: String,
    pub user_id: String,
    /// Producer half of the connection's outbound queue. The registry holds
    /// the only copy; dropping it ends the connection's write loop.
    pub outbound: mpsc::Sender<Bytes>,
}

/// Messages sent to the `HubActor`.
#[derive(Debug)]
pub enum HubMessage {
    Register(Registration),

    /// Remove a connection. Unknown ids are ignored.
    Unregister {
        room_id: String,
        connection_id: ConnectionId,
    },

    Broadcast(BroadcastEvent),

    GetStatus {
        respond_to: oneshot::Sender<HubStatus>,
    },

    /// Number of connections currently registered in a room.
    RoomSize {
        room_id: String,
        respond_to: oneshot::Sender<usize>,
    },
}

/// Snapshot of the dispatch loop's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStatus {
    pub room_count: usize,
    pub connection_count: usize,
    /// False when running in local-only mode.
    pub fanout_enabled: bool,
    pub events_dispatched: u64,
}
