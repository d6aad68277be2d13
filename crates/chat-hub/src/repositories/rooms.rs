use super::{PgChatStore, RoomAccess, RoomAccessDecision};
use crate::errors::HubError;
use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct AccessRow {
    is_creator: bool,
    is_member: bool,
}

#[async_trait]
impl RoomAccess for PgChatStore {
    #[instrument(skip_all, name = "chat.repo.check_access", fields(room_id = %room_id, user_id = %user_id))]
    async fn check_access(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<RoomAccessDecision, HubError> {
        let row: Option<AccessRow> = sqlx::query_as(
            r#"
            SELECT
                COALESCE(r.created_by = $2, false) AS is_creator,
                EXISTS (
                    SELECT 1 FROM room_members rm
                    WHERE rm.room_id = r.id AND rm.user_id = $2
                ) AS is_member
            FROM rooms r
            WHERE r.id = $1
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let decision = match row {
            None => RoomAccessDecision::RoomNotFound,
            Some(AccessRow {
                is_creator,
                is_member,
            }) if is_creator || is_member => RoomAccessDecision::Member,
            Some(_) => RoomAccessDecision::NotMember,
        };

        tracing::debug!(target: "chat.repo", decision = ?decision, "Room access checked");
        Ok(decision)
    }
}
