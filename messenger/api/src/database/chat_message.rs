use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::events::ChatMessageEvent;
use crate::shard::Shards;

/// Message kind, stored as the `message_kind` enum on every shard.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    sqlx::Type,
    serde::Serialize,
    serde::Deserialize,
)]
#[sqlx(type_name = "message_kind")]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    #[default]
    #[sqlx(rename = "TEXT")]
    Text,
    #[sqlx(rename = "IMAGE")]
    Image,
    #[sqlx(rename = "FILE")]
    File,
    #[sqlx(rename = "SYSTEM")]
    System,
}

impl MessageKind {
    /// Lenient parse for values arriving over the wire. Unknown kinds become
    /// TEXT instead of failing the whole event.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "IMAGE" => Self::Image,
            "FILE" => Self::File,
            "SYSTEM" => Self::System,
            _ => Self::Text,
        }
    }

}

/// One chat message. Partitioned: the row lives on the shard selected by
/// `chat_room_id`, which is why that column is immutable once persisted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatMessage {
    /// Primary key. Sequences are per shard, so ids are only unique within a
    /// shard; `(chat_room_id, id)` is globally unique.
    pub id: i64,
    /// Dedup key carried over from the log event. Redelivered events hit the
    /// unique index instead of inserting twice.
    pub event_id: Uuid,
    /// The shard key.
    pub chat_room_id: i64,
    /// Sender's user id. Not a foreign key: users live on the primary shard
    /// only, so integrity is an application-level contract.
    pub sender_id: i64,
    pub content: String,
    pub kind: MessageKind,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_content_type: Option<String>,
    /// Attachment size in bytes.
    pub attachment_size: Option<i64>,
    /// Ids of mentioned users.
    pub mentions: Vec<i64>,
    /// When the sender sent the message. Ordering and unread counts key off
    /// this, not the audit timestamps.
    pub sent_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a message, built from a log event by the consumer.
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub event_id: Uuid,
    pub chat_room_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub kind: MessageKind,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_content_type: Option<String>,
    pub attachment_size: Option<i64>,
    pub mentions: Vec<i64>,
    pub sent_at: DateTime<Utc>,
}

impl NewChatMessage {
    pub fn from_event(event: &ChatMessageEvent) -> Self {
        Self {
            event_id: event.event_id,
            chat_room_id: event.chat_room_id,
            sender_id: event.sender_id,
            content: event.content.clone(),
            kind: MessageKind::parse(&event.kind),
            attachment_url: event.attachment_url.clone(),
            attachment_name: event.attachment_name.clone(),
            attachment_content_type: event.attachment_content_type.clone(),
            attachment_size: event.attachment_size,
            mentions: event.mentions.clone(),
            sent_at: event.sent_at,
        }
    }
}

impl ChatMessage {
    /// Persists a message on the shard owning its room. Idempotent on
    /// `event_id`: a redelivered event returns the already-stored row.
    pub async fn insert(
        shards: &Shards<PgPool>,
        new: &NewChatMessage,
    ) -> sqlx::Result<ChatMessage> {
        shards
            .with_room(new.chat_room_id, |pool| async move {
                let inserted: Option<ChatMessage> = sqlx::query_as(
                    "INSERT INTO chat_messages (event_id, chat_room_id, sender_id, content, kind, attachment_url, attachment_name, attachment_content_type, attachment_size, mentions, sent_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                     ON CONFLICT (event_id) DO NOTHING \
                     RETURNING *",
                )
                .bind(new.event_id)
                .bind(new.chat_room_id)
                .bind(new.sender_id)
                .bind(&new.content)
                .bind(new.kind)
                .bind(&new.attachment_url)
                .bind(&new.attachment_name)
                .bind(&new.attachment_content_type)
                .bind(new.attachment_size)
                .bind(&new.mentions)
                .bind(new.sent_at)
                .fetch_optional(pool)
                .await?;

                match inserted {
                    Some(message) => Ok(message),
                    // Redelivery: the event was already persisted.
                    None => {
                        sqlx::query_as("SELECT * FROM chat_messages WHERE event_id = $1")
                            .bind(new.event_id)
                            .fetch_one(pool)
                            .await
                    }
                }
            })
            .await
    }

    /// A page of the room's history, newest first. All of a room's messages
    /// live on one shard, so this never fans out.
    pub async fn history(
        shards: &Shards<PgPool>,
        room_id: i64,
        page: i64,
        per_page: i64,
    ) -> sqlx::Result<Vec<ChatMessage>> {
        shards
            .with_room(room_id, |pool| async move {
                sqlx::query_as(
                    "SELECT * FROM chat_messages WHERE chat_room_id = $1 \
                     ORDER BY sent_at DESC, id DESC LIMIT $2 OFFSET $3",
                )
                .bind(room_id)
                .bind(per_page)
                .bind(page * per_page)
                .fetch_all(pool)
                .await
            })
            .await
    }

    /// Number of messages in the room sent strictly after `after`; counts
    /// everything when `after` is `None`. The boundary is exclusive: a
    /// message sent exactly at the read timestamp is read.
    pub async fn count_since(
        shards: &Shards<PgPool>,
        room_id: i64,
        after: Option<DateTime<Utc>>,
    ) -> sqlx::Result<i64> {
        shards
            .with_room(room_id, |pool| async move {
                let (count,): (i64,) = match after {
                    Some(after) => {
                        sqlx::query_as(
                            "SELECT COUNT(*) FROM chat_messages WHERE chat_room_id = $1 AND sent_at > $2",
                        )
                        .bind(room_id)
                        .bind(after)
                        .fetch_one(pool)
                        .await?
                    }
                    None => {
                        sqlx::query_as(
                            "SELECT COUNT(*) FROM chat_messages WHERE chat_room_id = $1",
                        )
                        .bind(room_id)
                        .fetch_one(pool)
                        .await?
                    }
                };

                Ok(count)
            })
            .await
    }

    /// The most recent message of a room, for list previews.
    pub async fn latest(
        shards: &Shards<PgPool>,
        room_id: i64,
    ) -> sqlx::Result<Option<ChatMessage>> {
        shards
            .with_room(room_id, |pool| async move {
                sqlx::query_as(
                    "SELECT * FROM chat_messages WHERE chat_room_id = $1 \
                     ORDER BY sent_at DESC, id DESC LIMIT 1",
                )
                .bind(room_id)
                .fetch_optional(pool)
                .await
            })
            .await
    }

    /// Messages a sender wrote within a time range, on one given shard. This
    /// is the only cross-partition read in the system: the report
    /// collaborator calls it once per shard (`Shards::iter`) and merges the
    /// results itself.
    pub async fn by_sender_between(
        pool: &PgPool,
        sender_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> sqlx::Result<Vec<ChatMessage>> {
        sqlx::query_as(
            "SELECT * FROM chat_messages WHERE sender_id = $1 AND sent_at BETWEEN $2 AND $3 \
             ORDER BY sent_at",
        )
        .bind(sender_id)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_known_values() {
        assert_eq!(MessageKind::parse("TEXT"), MessageKind::Text);
        assert_eq!(MessageKind::parse("image"), MessageKind::Image);
        assert_eq!(MessageKind::parse(" File "), MessageKind::File);
        assert_eq!(MessageKind::parse("SYSTEM"), MessageKind::System);
    }

    #[test]
    fn unknown_kind_falls_back_to_text() {
        assert_eq!(MessageKind::parse(""), MessageKind::Text);
        assert_eq!(MessageKind::parse("VIDEO"), MessageKind::Text);
    }

    #[test]
    fn kind_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&MessageKind::Image).expect("serialize"),
            "\"IMAGE\""
        );
    }
}
