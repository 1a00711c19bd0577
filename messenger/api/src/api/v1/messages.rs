use std::collections::{HashMap, HashSet};

use chrono::Utc;
use hyper::{Body, Request, Response, StatusCode};
use uuid::Uuid;

use super::super::error::{Result, ResultExt};
use super::super::identity::{identity, Identity};
use super::{global, param_i64, query_param, read_json, success};
use crate::database::{ChatMessage, ChatRoom, ChatRoomMember, User};
use crate::events::ChatMessageEvent;
use crate::producer;
use crate::subscription::MessageDelivery;

const MAX_MESSAGE_LENGTH: usize = 5000;
const MAX_PAGE_SIZE: i64 = 100;

/// Inbound send request. The REST path and the WebSocket path both normalize
/// through this into a log event.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub kind: Option<String>,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_content_type: Option<String>,
    pub attachment_size: Option<i64>,
    pub mentions: Option<Vec<i64>>,
}

impl SendMessageRequest {
    pub fn into_event(
        self,
        room_id: i64,
        sender: &Identity,
    ) -> std::result::Result<ChatMessageEvent, &'static str> {
        let content = self.content.unwrap_or_default();
        if content.len() > MAX_MESSAGE_LENGTH {
            return Err("message too long");
        }
        if content.is_empty() && self.attachment_url.is_none() {
            return Err("message is empty");
        }

        Ok(ChatMessageEvent {
            event_id: Uuid::new_v4(),
            chat_room_id: room_id,
            sender_id: sender.user_id,
            sender_name: sender.display_name.clone(),
            content,
            kind: self.kind.unwrap_or_default(),
            attachment_url: self.attachment_url,
            attachment_name: self.attachment_name,
            attachment_content_type: self.attachment_content_type,
            attachment_size: self.attachment_size,
            mentions: self.mentions.unwrap_or_default(),
            sent_at: Utc::now(),
        })
    }
}

/// Synchronous send path. The message is accepted once it is handed to the
/// producer; actual delivery is asynchronous and best effort, so this never
/// reports a broker failure back to the sender.
pub async fn send(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    let sender = identity(&req)?;
    let room_id = param_i64(&req, "roomId")?;

    ChatRoom::get(global.shards.primary(), room_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load room"))?
        .ok_or((StatusCode::NOT_FOUND, "chat room not found"))?;

    let request: SendMessageRequest = read_json(req).await?;
    let event = request
        .into_event(room_id, &sender)
        .map_err(|message| (StatusCode::BAD_REQUEST, message))?;

    let event_id = event.event_id;
    producer::publish(&global, event);

    Ok(success(
        "message accepted",
        serde_json::json!({ "event_id": event_id }),
    ))
}

/// A chronological page of the room's history, with sender display data and
/// per-message unread counts.
pub async fn history(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    identity(&req)?;
    let room_id = param_i64(&req, "roomId")?;

    let page = query_param(&req, "page")
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(0)
        .max(0);
    let per_page = query_param(&req, "per_page")
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(50)
        .clamp(1, MAX_PAGE_SIZE);

    let primary = global.shards.primary();

    ChatRoom::get(primary, room_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load room"))?
        .ok_or((StatusCode::NOT_FOUND, "chat room not found"))?;

    let messages = ChatMessage::history(&global.shards, room_id, page, per_page)
        .await
        .extend_route((
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to load message history",
        ))?;

    let sender_ids: Vec<i64> = messages
        .iter()
        .map(|message| message.sender_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let senders: HashMap<i64, User> = User::find_many(primary, &sender_ids)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load senders"))?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let members = ChatRoomMember::for_room(primary, room_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load members"))?;

    let mut deliveries: Vec<MessageDelivery> = messages
        .iter()
        .map(|message| {
            let sender = senders.get(&message.sender_id);
            let unread_count = members
                .iter()
                .filter(|member| member.is_unread_at(message.sent_at))
                .count() as i64;

            MessageDelivery::new(
                message,
                sender.map_or("unknown", |user| user.display_name.as_str()),
                sender.and_then(|user| user.avatar_url.clone()),
                unread_count,
            )
        })
        .collect();

    // The query returns newest first; clients render oldest first.
    deliveries.reverse();

    Ok(success("message history", deliveries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Identity {
        Identity {
            user_id: 42,
            display_name: "ada".to_string(),
        }
    }

    #[test]
    fn request_normalizes_into_an_event() {
        let request = SendMessageRequest {
            content: Some("hello".to_string()),
            mentions: Some(vec![1, 5]),
            ..Default::default()
        };

        let event = request.into_event(7, &sender()).expect("event");

        assert_eq!(event.chat_room_id, 7);
        assert_eq!(event.sender_id, 42);
        assert_eq!(event.sender_name, "ada");
        assert_eq!(event.content, "hello");
        assert_eq!(event.mentions, vec![1, 5]);
    }

    #[test]
    fn oversized_content_is_rejected() {
        let request = SendMessageRequest {
            content: Some("x".repeat(MAX_MESSAGE_LENGTH + 1)),
            ..Default::default()
        };

        assert_eq!(
            request.into_event(7, &sender()).unwrap_err(),
            "message too long"
        );
    }

    #[test]
    fn empty_message_without_attachment_is_rejected() {
        let request = SendMessageRequest::default();

        assert_eq!(
            request.into_event(7, &sender()).unwrap_err(),
            "message is empty"
        );
    }

    #[test]
    fn attachment_only_message_is_allowed() {
        let request = SendMessageRequest {
            attachment_url: Some("https://files.example/photo.png".to_string()),
            attachment_name: Some("photo.png".to_string()),
            kind: Some("IMAGE".to_string()),
            ..Default::default()
        };

        let event = request.into_event(7, &sender()).expect("event");
        assert_eq!(event.kind, "IMAGE");
        assert_eq!(event.content, "");
    }
}
