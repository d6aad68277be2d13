//! HTTP routes for the chat hub.
//!
//! Defines the Axum router and application state. Health and metrics
//! endpoints are merged in by `main`.

use crate::handlers;
use crate::hub::{ConnectionConfig, HubHandle, HubMetrics};
use crate::repositories::RoomAccess;
use axum::{routing::get, Router};
use common::secret::SecretString;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,

    /// Membership checks for the handshake.
    pub rooms: Arc<dyn RoomAccess>,

    /// HS256 key for user access tokens.
    pub jwt_secret: SecretString,

    /// Settings for every accepted connection.
    pub connection: ConnectionConfig,

    /// Largest client frame accepted, in bytes.
    pub max_message_bytes: usize,

    pub metrics: Arc<HubMetrics>,
}

/// Build the application routes.
///
/// - `GET /ws/rooms/:room_id` - WebSocket upgrade into a room
/// - `TraceLayer` for request logging
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/rooms/:room_id", get(handlers::ws::ws_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
