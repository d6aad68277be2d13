//! The broadcast hub.
//!
//! - [`HubHandle`] / `HubActor`: the dispatch loop owning the room registry
//! - [`ConnectionActor`]: one per client transport
//! - [`BroadcastEvent`]: the unit of work flowing between them
//!
//! ```text
//! ConnectionActor --Broadcast--> HubActor --try_send--> ConnectionActor queues
//!                                   |  ^
//!                          publish  v  |  ingest
//!                                FanoutBridge
//! ```

pub mod connection;
pub mod dispatcher;
pub mod event;
pub mod messages;
pub mod metrics;

pub use connection::{ConnectionActor, ConnectionActorHandle, ConnectionConfig, ConnectionIdentity};
pub use dispatcher::{HubConfig, HubHandle};
pub use event::BroadcastEvent;
pub use messages::{ConnectionId, HubMessage, HubStatus, Registration};
pub use metrics::{HubMetrics, HubMetricsSnapshot};
