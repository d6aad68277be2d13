//! Test fixtures: client frames, hub wiring and user tokens.

use crate::mock_transport::{MockTransport, TestClient};
use chat_hub::hub::{
    ConnectionActor, ConnectionActorHandle, ConnectionConfig, ConnectionIdentity, HubConfig,
    HubHandle, HubMetrics,
};
use common::jwt::UserClaims;
use jsonwebtoken::{encode, EncodingKey, Header};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// HS256 secret used by [`mint_user_token`].
pub const TEST_JWT_SECRET: &str = "test-secret-at-least-32-bytes-long!!";

/// A `message` frame as a client would send it.
#[must_use]
pub fn chat_frame(room_id: impl Display, content: &str) -> String {
    serde_json::json!({
        "type": "message",
        "room_id": room_id.to_string(),
        "content": content,
    })
    .to_string()
}

/// A `typing` frame; relayed without persistence.
#[must_use]
pub fn typing_frame(room_id: impl Display) -> String {
    serde_json::json!({
        "type": "typing",
        "room_id": room_id.to_string(),
        "payload": true,
    })
    .to_string()
}

/// Hub settings with a small mailbox and a recognizable id.
#[must_use]
pub fn test_hub_config(hub_id: &str) -> HubConfig {
    HubConfig {
        hub_id: hub_id.to_string(),
        mailbox_capacity: 64,
        ..HubConfig::default()
    }
}

/// Connection settings with an outbound queue of `capacity` frames.
#[must_use]
pub fn test_connection_config(capacity: usize) -> ConnectionConfig {
    ConnectionConfig {
        outbound_capacity: capacity,
    }
}

/// Spawn a connection actor over a mock transport and return the client end.
///
/// Registration is asynchronous; use [`wait_for_room_size`] before sending
/// if the test depends on the connection being in the room.
pub fn connect_client(
    hub: &HubHandle,
    room_id: impl Display,
    user_id: impl Display,
    capacity: usize,
    metrics: &Arc<HubMetrics>,
) -> (TestClient, ConnectionActorHandle, JoinHandle<()>) {
    let (client, transport) = MockTransport::pair();
    let (handle, task) = ConnectionActor::spawn(
        ConnectionIdentity::new(room_id.to_string(), user_id.to_string()),
        transport.sink,
        transport.stream,
        hub.clone(),
        test_connection_config(capacity),
        Arc::clone(metrics),
    );
    (client, handle, task)
}

/// Poll until `room_id` holds exactly `size` connections. Panics after 2s.
pub async fn wait_for_room_size(hub: &HubHandle, room_id: impl Display, size: usize) {
    let room_id = room_id.to_string();
    tokio::time::timeout(Duration::from_secs(2), async {
        while hub.room_size(room_id.as_str()).await.unwrap() != size {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("room {room_id} never reached {size} connections"));
}

/// Claims for `user_id` valid for one hour.
#[must_use]
pub fn test_claims(user_id: Uuid) -> UserClaims {
    let now = chrono::Utc::now().timestamp();
    UserClaims {
        user_id,
        username: "test-user".to_string(),
        email: "test@example.com".to_string(),
        exp: now + 3600,
        iat: now,
        nbf: None,
        iss: None,
        sub: Some(user_id.to_string()),
    }
}

/// Sign `claims` with `secret` (HS256).
#[must_use]
pub fn sign_claims(claims: &UserClaims, secret: &str) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("failed to sign test token")
}

/// A valid token for `user_id`, signed with [`TEST_JWT_SECRET`].
#[must_use]
pub fn mint_user_token(user_id: Uuid) -> String {
    sign_claims(&test_claims(user_id), TEST_JWT_SECRET)
}

/// A token for `user_id` that expired an hour ago.
#[must_use]
pub fn expired_user_token(user_id: Uuid) -> String {
    let mut claims = test_claims(user_id);
    claims.iat -= 7200;
    claims.exp = claims.iat + 3600;
    sign_claims(&claims, TEST_JWT_SECRET)
}
