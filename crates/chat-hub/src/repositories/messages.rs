use super::{MessageStore, PgChatStore};
use crate::errors::HubError;
use crate::protocol::PersistedMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    room_id: Uuid,
    user_id: Uuid,
    content: String,
    message_type: String,
    created_at: DateTime<Utc>,
    username: Option<String>,
}

impl From<MessageRow> for PersistedMessage {
    fn from(row: MessageRow) -> Self {
        PersistedMessage {
            id: row.id,
            room_id: row.room_id,
            user_id: row.user_id,
            content: row.content,
            message_type: row.message_type,
            created_at: row.created_at,
            username: row.username,
        }
    }
}

#[async_trait]
impl MessageStore for PgChatStore {
    /// The membership check and the insert run as one statement, so a user
    /// removed from the room between handshake and send cannot post.
    #[instrument(skip_all, name = "chat.repo.create_message", fields(room_id = %room_id, user_id = %user_id))]
    async fn create_message(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        content: &str,
        message_type: &str,
    ) -> Result<PersistedMessage, HubError> {
        let row: Option<MessageRow> = sqlx::query_as(
            r#"
            WITH author AS (
                SELECT u.id, u.username
                FROM users u
                WHERE u.id = $2
                  AND (
                    EXISTS (
                        SELECT 1 FROM room_members rm
                        WHERE rm.room_id = $1 AND rm.user_id = $2
                    )
                    OR EXISTS (
                        SELECT 1 FROM rooms r
                        WHERE r.id = $1 AND r.created_by = $2
                    )
                  )
            ),
            inserted AS (
                INSERT INTO messages (room_id, user_id, content, message_type)
                SELECT $1, author.id, $3, $4 FROM author
                RETURNING id, room_id, user_id, content, message_type, created_at
            )
            SELECT i.id, i.room_id, i.user_id, i.content, i.message_type, i.created_at,
                   a.username
            FROM inserted i
            CROSS JOIN author a
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(content)
        .bind(message_type)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                tracing::debug!(
                    target: "chat.repo",
                    message_id = %row.id,
                    "Message stored"
                );
                Ok(row.into())
            }
            None => {
                tracing::debug!(
                    target: "chat.repo",
                    "Message rejected: author not a member of room"
                );
                Err(HubError::NotRoomMember)
            }
        }
    }
}
