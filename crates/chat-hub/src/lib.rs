//! Chat Hub Service Library
//!
//! Real-time, room-scoped chat delivery for clients connected over
//! WebSockets, fanned out across hub instances through Redis pub/sub.
//!
//! # Architecture
//!
//! ```text
//! WebSocket ── ConnectionActor ──Broadcast──▶ HubActor (one per process)
//!                    ▲                           │ process (persist + rewrite)
//!                    │ outbound queue            │ deliver to room
//!                    └───────────────────────────┤
//!                                                │ publish (local events only)
//!                                                ▼
//!                                    Redis chat:room:{id} ──▶ other hubs
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner registry**: only the dispatch loop touches the
//!   room → connection map; everyone else sends it messages
//! - **Evict, don't block**: a full outbound queue removes the connection
//! - **Loop prevention**: events from the bus are never published again
//! - **Optional fanout**: without Redis the hub serves local rooms only
//!
//! # Modules
//!
//! - [`hub`] - Dispatch loop and connection actors
//! - [`processor`] - Persist-and-rewrite stage run by the dispatch loop
//! - [`fanout`] - Cross-instance bridge over a pub/sub bus
//! - [`handlers`] / [`routes`] - WebSocket acceptor
//! - [`repositories`] - Postgres access
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP mappings

pub mod config;
pub mod errors;
pub mod fanout;
pub mod handlers;
pub mod hub;
pub mod observability;
pub mod processor;
pub mod protocol;
pub mod repositories;
pub mod routes;
