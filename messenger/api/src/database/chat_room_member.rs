use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Membership edge between a user and a room, on the primary shard. Carries
/// the read cursor that unread counts are computed from.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatRoomMember {
    pub id: i64,
    pub chat_room_id: i64,
    pub user_id: i64,
    /// When the member last acknowledged reading the room. `None` means they
    /// have read nothing.
    pub last_read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatRoomMember {
    /// Whether a message sent at `sent_at` is unread for this member. The
    /// boundary is exclusive: a message sent exactly at the read cursor
    /// counts as read.
    pub fn is_unread_at(&self, sent_at: DateTime<Utc>) -> bool {
        match self.last_read_at {
            Some(last_read) => last_read < sent_at,
            None => true,
        }
    }

    pub async fn for_room(primary: &PgPool, room_id: i64) -> sqlx::Result<Vec<ChatRoomMember>> {
        sqlx::query_as("SELECT * FROM chat_room_members WHERE chat_room_id = $1 ORDER BY id")
            .bind(room_id)
            .fetch_all(primary)
            .await
    }

    pub async fn for_user(primary: &PgPool, user_id: i64) -> sqlx::Result<Vec<ChatRoomMember>> {
        sqlx::query_as("SELECT * FROM chat_room_members WHERE user_id = $1 ORDER BY id")
            .bind(user_id)
            .fetch_all(primary)
            .await
    }

    pub async fn find(
        primary: &PgPool,
        room_id: i64,
        user_id: i64,
    ) -> sqlx::Result<Option<ChatRoomMember>> {
        sqlx::query_as("SELECT * FROM chat_room_members WHERE chat_room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(primary)
            .await
    }

    pub async fn join(
        primary: &PgPool,
        room_id: i64,
        user_id: i64,
    ) -> sqlx::Result<ChatRoomMember> {
        sqlx::query_as(
            "INSERT INTO chat_room_members (chat_room_id, user_id) VALUES ($1, $2) \
             ON CONFLICT (chat_room_id, user_id) DO UPDATE SET updated_at = NOW() \
             RETURNING *",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_one(primary)
        .await
    }

    pub async fn leave(primary: &PgPool, room_id: i64, user_id: i64) -> sqlx::Result<bool> {
        let result =
            sqlx::query("DELETE FROM chat_room_members WHERE chat_room_id = $1 AND user_id = $2")
                .bind(room_id)
                .bind(user_id)
                .execute(primary)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Read acknowledgement: moves the member's read cursor to now. Returns
    /// false when the caller is not a member.
    pub async fn mark_read(primary: &PgPool, room_id: i64, user_id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE chat_room_members SET last_read_at = NOW(), updated_at = NOW() \
             WHERE chat_room_id = $1 AND user_id = $2",
        )
        .bind(room_id)
        .bind(user_id)
        .execute(primary)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn member_count(primary: &PgPool, room_id: i64) -> sqlx::Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_room_members WHERE chat_room_id = $1")
                .bind(room_id)
                .fetch_one(primary)
                .await?;

        Ok(count)
    }

    /// How many members have not read a message sent at `sent_at`. Feeds the
    /// unread indicator on delivery payloads.
    pub async fn unread_member_count(
        primary: &PgPool,
        room_id: i64,
        sent_at: DateTime<Utc>,
    ) -> sqlx::Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM chat_room_members \
             WHERE chat_room_id = $1 AND (last_read_at IS NULL OR last_read_at < $2)",
        )
        .bind(room_id)
        .bind(sent_at)
        .fetch_one(primary)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn member(last_read_at: Option<DateTime<Utc>>) -> ChatRoomMember {
        let now = Utc::now();
        ChatRoomMember {
            id: 1,
            chat_room_id: 7,
            user_id: 42,
            last_read_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn never_read_means_everything_is_unread() {
        let member = member(None);

        assert!(member.is_unread_at(Utc::now()));
        assert!(member.is_unread_at(Utc::now() - Duration::days(365)));
    }

    #[test]
    fn read_cursor_boundary_is_exclusive() {
        let read_at = Utc::now();
        let member = member(Some(read_at));

        // Sent exactly at the cursor: read.
        assert!(!member.is_unread_at(read_at));
        // Sent before the cursor: read.
        assert!(!member.is_unread_at(read_at - Duration::seconds(1)));
        // Sent after the cursor: unread.
        assert!(member.is_unread_at(read_at + Duration::milliseconds(1)));
    }
}
