use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Room kind, stored as the `room_kind` enum on the primary shard.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    sqlx::Type,
    serde::Serialize,
    serde::Deserialize,
)]
#[sqlx(type_name = "room_kind")]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomKind {
    #[sqlx(rename = "DIRECT")]
    Direct,
    #[sqlx(rename = "GROUP")]
    Group,
}

impl RoomKind {
    /// Anything that is not DIRECT is a group room.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("DIRECT") {
            Self::Direct
        } else {
            Self::Group
        }
    }
}

/// One conversation. Rooms are not partitioned: they live on the primary
/// shard no matter where their messages go.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatRoom {
    pub id: i64,
    pub name: String,
    pub kind: RoomKind,
    /// The most recent message's id, maintained by the consumer for room
    /// list previews. Points into the room's own message shard.
    pub last_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatRoom {
    /// Creates a room and its initial memberships in one transaction on the
    /// primary shard.
    pub async fn create(
        primary: &PgPool,
        name: &str,
        kind: RoomKind,
        member_ids: &[i64],
    ) -> sqlx::Result<ChatRoom> {
        let mut tx = primary.begin().await?;

        let room: ChatRoom =
            sqlx::query_as("INSERT INTO chat_rooms (name, kind) VALUES ($1, $2) RETURNING *")
                .bind(name)
                .bind(kind)
                .fetch_one(&mut *tx)
                .await?;

        for user_id in member_ids {
            sqlx::query(
                "INSERT INTO chat_room_members (chat_room_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT (chat_room_id, user_id) DO NOTHING",
            )
            .bind(room.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(room)
    }

    pub async fn get(primary: &PgPool, room_id: i64) -> sqlx::Result<Option<ChatRoom>> {
        sqlx::query_as("SELECT * FROM chat_rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(primary)
            .await
    }

    /// Advances the room's preview pointer. Called by the consumer after each
    /// persist; a stale concurrent update is harmless since the pointer is
    /// only a hint.
    pub async fn set_last_message(
        primary: &PgPool,
        room_id: i64,
        message_id: i64,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE chat_rooms SET last_message_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(room_id)
        .bind(message_id)
        .execute(primary)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_kind_parse() {
        assert_eq!(RoomKind::parse("DIRECT"), RoomKind::Direct);
        assert_eq!(RoomKind::parse("direct"), RoomKind::Direct);
        assert_eq!(RoomKind::parse("GROUP"), RoomKind::Group);
        assert_eq!(RoomKind::parse("anything else"), RoomKind::Group);
    }
}
