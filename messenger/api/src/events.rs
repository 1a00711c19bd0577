use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Stream holding every inbound chat-send event. The name must not contain
/// dots.
pub const STREAM_NAME: &str = "chat-send";

/// Subject prefix for the chat-send topic. One subject per log partition:
/// `chat.send.0` .. `chat.send.{partitions - 1}`.
pub const SUBJECT_PREFIX: &str = "chat.send";

pub fn subject_for(partition: usize) -> String {
    format!("{SUBJECT_PREFIX}.{partition}")
}

pub fn all_subjects(partitions: usize) -> Vec<String> {
    (0..partitions).map(subject_for).collect()
}

/// The partition a room's events land on. Equal room ids always map to the
/// same subject, which is what gives per-room ordering: the broker only
/// orders within a subject, never across them.
pub fn log_partition(room_id: i64, partitions: usize) -> usize {
    room_id.rem_euclid(partitions as i64) as usize
}

/// A chat-send event as it travels through the durable log, JSON-encoded.
///
/// Both ingress paths (REST and WebSocket) normalize into this shape before
/// publishing. The event deliberately has no storage id: the message does not
/// exist until the consumer persists it. `event_id` is the dedup key that
/// makes redelivered events idempotent to persist.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessageEvent {
    pub event_id: Uuid,
    pub chat_room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    #[serde(default)]
    pub content: String,
    /// Message kind as a string; unknown values normalize to TEXT on the
    /// consumer side.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_name: Option<String>,
    #[serde(default)]
    pub attachment_content_type: Option<String>,
    #[serde(default)]
    pub attachment_size: Option<i64>,
    #[serde(default)]
    pub mentions: Vec<i64>,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessageEvent {
    pub fn subject(&self, partitions: usize) -> String {
        subject_for(log_partition(self.chat_room_id, partitions))
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(room_id: i64) -> ChatMessageEvent {
        ChatMessageEvent {
            event_id: Uuid::new_v4(),
            chat_room_id: room_id,
            sender_id: 42,
            sender_name: "ada".to_string(),
            content: "hello".to_string(),
            kind: "TEXT".to_string(),
            attachment_url: None,
            attachment_name: None,
            attachment_content_type: None,
            attachment_size: None,
            mentions: vec![1, 5, 12],
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let event = ChatMessageEvent {
            attachment_url: Some("https://files.example/report.pdf".to_string()),
            attachment_name: Some("report.pdf".to_string()),
            attachment_content_type: Some("application/pdf".to_string()),
            attachment_size: Some(81_920),
            ..event(7)
        };

        let decoded = ChatMessageEvent::decode(&event.encode().expect("encode")).expect("decode");

        assert_eq!(decoded.event_id, event.event_id);
        assert_eq!(decoded.chat_room_id, 7);
        assert_eq!(decoded.sender_id, 42);
        assert_eq!(decoded.content, "hello");
        assert_eq!(decoded.kind, "TEXT");
        assert_eq!(decoded.attachment_name.as_deref(), Some("report.pdf"));
        assert_eq!(decoded.attachment_size, Some(81_920));
        assert_eq!(decoded.mentions, vec![1, 5, 12]);
        assert_eq!(decoded.sent_at, event.sent_at);
    }

    #[test]
    fn decode_fills_defaults_for_missing_fields() {
        let payload = serde_json::json!({
            "event_id": Uuid::new_v4(),
            "chat_room_id": 4,
            "sender_id": 1,
            "sender_name": "grace",
            "sent_at": Utc::now(),
        });

        let event =
            ChatMessageEvent::decode(payload.to_string().as_bytes()).expect("decode");

        assert_eq!(event.content, "");
        assert_eq!(event.kind, "");
        assert!(event.mentions.is_empty());
        assert!(event.attachment_url.is_none());
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        assert!(ChatMessageEvent::decode(b"not json at all").is_err());
        assert!(ChatMessageEvent::decode(br#"{"chat_room_id": "seven"}"#).is_err());
    }

    #[test]
    fn same_room_always_maps_to_the_same_subject() {
        let ev = event(7);

        assert_eq!(ev.subject(4), "chat.send.3");
        assert_eq!(ev.subject(4), event(7).subject(4));
        assert_eq!(event(4).subject(4), "chat.send.0");
    }

    #[test]
    fn subjects_cover_every_partition() {
        assert_eq!(
            all_subjects(4),
            vec!["chat.send.0", "chat.send.1", "chat.send.2", "chat.send.3"]
        );
    }
}
