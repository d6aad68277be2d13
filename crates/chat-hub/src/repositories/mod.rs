//! Persistence adapters.
//!
//! The hub reads and writes three tables owned by the REST layer:
//! `rooms`, `room_members` and `messages` (plus `users` for display names).
//! Two narrow traits keep the dispatch path and the handshake independent
//! of Postgres so both can run against in-memory fakes in tests.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Message content is never logged

mod messages;
mod rooms;

use crate::errors::HubError;
use crate::protocol::PersistedMessage;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Writes chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message and return the stored row.
    ///
    /// Fails with `HubError::NotRoomMember` if the author is neither a
    /// member nor the creator of the room.
    async fn create_message(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        content: &str,
        message_type: &str,
    ) -> Result<PersistedMessage, HubError>;
}

/// Outcome of a room access check at handshake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAccessDecision {
    /// User is a member or the creator of the room.
    Member,
    NotMember,
    RoomNotFound,
}

/// Answers whether a user may join a room.
#[async_trait]
pub trait RoomAccess: Send + Sync {
    async fn check_access(&self, room_id: Uuid, user_id: Uuid)
        -> Result<RoomAccessDecision, HubError>;
}

/// Postgres-backed implementation of both traits.
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Round-trip to the database; used for startup checks.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Database` if the query fails.
    pub async fn ping(&self) -> Result<(), HubError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
