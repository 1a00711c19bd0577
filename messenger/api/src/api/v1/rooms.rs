use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hyper::{Body, Request, Response, StatusCode};
use uuid::Uuid;

use super::super::error::{Result, ResultExt};
use super::super::identity::{identity, Identity};
use super::{global, param_i64, read_json, success};
use crate::consumer;
use crate::database::{ChatMessage, ChatRoom, ChatRoomMember, RoomKind, User};
use crate::events::ChatMessageEvent;
use crate::global::GlobalState;

/// Room list previews are truncated to this many characters.
const PREVIEW_LENGTH: usize = 30;

#[derive(Debug, serde::Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<i64>,
}

#[derive(Debug, serde::Serialize)]
pub struct RoomResponse {
    pub id: i64,
    pub name: String,
    pub kind: RoomKind,
    pub member_count: i64,
    pub unread_count: i64,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, serde::Serialize)]
pub struct MemberResponse {
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub online: bool,
}

pub async fn create_room(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    let creator = identity(&req)?;

    let request: CreateRoomRequest = read_json(req).await?;

    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "room name is required").into());
    }

    let kind = request
        .kind
        .as_deref()
        .map(RoomKind::parse)
        .unwrap_or(RoomKind::Group);

    // The creator is always a member; ignore duplicate ids.
    let mut member_ids = vec![creator.user_id];
    for member_id in request.member_ids {
        if !member_ids.contains(&member_id) {
            member_ids.push(member_id);
        }
    }

    let room = ChatRoom::create(global.shards.primary(), &name, kind, &member_ids)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to create room"))?;

    tracing::info!(
        room_id = room.id,
        members = member_ids.len(),
        "created chat room"
    );

    // System echo through the direct consumer path: members see the room come
    // alive immediately, without a round trip through the log. Best effort.
    let event = ChatMessageEvent {
        event_id: Uuid::new_v4(),
        chat_room_id: room.id,
        sender_id: creator.user_id,
        sender_name: creator.display_name.clone(),
        content: format!("{} created the room", creator.display_name),
        kind: "SYSTEM".to_string(),
        attachment_url: None,
        attachment_name: None,
        attachment_content_type: None,
        attachment_size: None,
        mentions: Vec::new(),
        sent_at: Utc::now(),
    };
    if let Err(err) = consumer::process_event(&global, event).await {
        tracing::warn!(room_id = room.id, error = %err, "failed to echo system message");
    }

    let member_count = member_ids.len() as i64;
    Ok(success(
        "room created",
        RoomResponse {
            id: room.id,
            name: room.name,
            kind: room.kind,
            member_count,
            unread_count: 0,
            last_message: None,
            last_message_at: None,
        },
    ))
}

pub async fn list_rooms(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    let caller = identity(&req)?;

    let primary = global.shards.primary();

    let memberships = ChatRoomMember::for_user(primary, caller.user_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load rooms"))?;

    let mut rooms = Vec::with_capacity(memberships.len());
    for membership in memberships {
        let Some(room) = ChatRoom::get(primary, membership.chat_room_id)
            .await
            .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load room"))?
        else {
            // Memberships reference rooms without a database-level constraint;
            // a dangling edge is a bug worth surfacing, not a fatal one.
            tracing::warn!(
                room_id = membership.chat_room_id,
                user_id = caller.user_id,
                "membership references a missing room"
            );
            continue;
        };

        rooms.push(room_response(&global, &caller, room, membership.last_read_at).await?);
    }

    Ok(success("rooms", rooms))
}

pub async fn get_room(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    let caller = identity(&req)?;
    let room_id = param_i64(&req, "roomId")?;

    let primary = global.shards.primary();

    let room = ChatRoom::get(primary, room_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load room"))?
        .ok_or((StatusCode::NOT_FOUND, "chat room not found"))?;

    let last_read_at = ChatRoomMember::find(primary, room_id, caller.user_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load membership"))?
        .and_then(|membership| membership.last_read_at);

    let response = room_response(&global, &caller, room, last_read_at).await?;

    Ok(success("room", response))
}

pub async fn list_members(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    identity(&req)?;
    let room_id = param_i64(&req, "roomId")?;

    let primary = global.shards.primary();

    ChatRoom::get(primary, room_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load room"))?
        .ok_or((StatusCode::NOT_FOUND, "chat room not found"))?;

    let members = ChatRoomMember::for_room(primary, room_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load members"))?;

    let member_ids: Vec<i64> = members.iter().map(|member| member.user_id).collect();
    let users: HashMap<i64, User> = User::find_many(primary, &member_ids)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load users"))?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let mut responses = Vec::with_capacity(members.len());
    for member in members {
        let online = match global.presence.is_online(member.user_id).await {
            Ok(online) => online,
            Err(err) => {
                tracing::debug!(user_id = member.user_id, error = %err, "presence lookup failed");
                false
            }
        };

        let user = users.get(&member.user_id);
        responses.push(MemberResponse {
            user_id: member.user_id,
            username: user.map(|user| user.username.clone()),
            display_name: user.map(|user| user.display_name.clone()),
            avatar_url: user.and_then(|user| user.avatar_url.clone()),
            last_read_at: member.last_read_at,
            online,
        });
    }

    Ok(success("members", responses))
}

#[derive(Debug, serde::Deserialize)]
pub struct AddMemberRequest {
    pub user_id: i64,
}

pub async fn add_member(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    identity(&req)?;
    let room_id = param_i64(&req, "roomId")?;

    let primary = global.shards.primary();

    ChatRoom::get(primary, room_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load room"))?
        .ok_or((StatusCode::NOT_FOUND, "chat room not found"))?;

    let request: AddMemberRequest = read_json(req).await?;

    let member = ChatRoomMember::join(primary, room_id, request.user_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to add member"))?;

    tracing::info!(room_id, user_id = member.user_id, "member joined room");

    Ok(success(
        "member added",
        serde_json::json!({ "user_id": member.user_id }),
    ))
}

pub async fn remove_member(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    identity(&req)?;
    let room_id = param_i64(&req, "roomId")?;
    let user_id = param_i64(&req, "userId")?;

    let removed = ChatRoomMember::leave(global.shards.primary(), room_id, user_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to remove member"))?;

    if removed {
        tracing::info!(room_id, user_id, "member left room");
    }

    Ok(success(
        "member removed",
        serde_json::json!({ "removed": removed }),
    ))
}

pub async fn mark_read(req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    let caller = identity(&req)?;
    let room_id = param_i64(&req, "roomId")?;

    let marked = ChatRoomMember::mark_read(global.shards.primary(), room_id, caller.user_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to mark as read"))?;

    Ok(success("marked as read", serde_json::json!({ "marked": marked })))
}

async fn room_response(
    global: &GlobalState,
    caller: &Identity,
    room: ChatRoom,
    last_read_at: Option<DateTime<Utc>>,
) -> Result<RoomResponse> {
    let primary = global.shards.primary();

    let member_count = ChatRoomMember::member_count(primary, room.id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to count members"))?;

    // All of the room's messages live on one shard, so both the unread count
    // and the preview are single-partition queries.
    let unread_count = ChatMessage::count_since(&global.shards, room.id, last_read_at)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to count unread"))?;

    let latest = ChatMessage::latest(&global.shards, room.id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load preview"))?;

    let (last_message, last_message_at) = match latest {
        Some(message) => (Some(preview(&message.content)), Some(message.sent_at)),
        None => (None, None),
    };

    // Direct rooms display the other participant's name.
    let mut name = room.name;
    if room.kind == RoomKind::Direct {
        let members = ChatRoomMember::for_room(primary, room.id)
            .await
            .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load members"))?;

        if let Some(other) = members
            .iter()
            .find(|member| member.user_id != caller.user_id)
        {
            if let Some(user) = User::find(primary, other.user_id)
                .await
                .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load user"))?
            {
                name = user.display_name;
            }
        }
    }

    Ok(RoomResponse {
        id: room.id,
        name,
        kind: room.kind,
        member_count,
        unread_count,
        last_message,
        last_message_at,
    })
}

fn preview(content: &str) -> String {
    let mut preview: String = content.chars().take(PREVIEW_LENGTH).collect();
    if preview.len() < content.len() {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_content() {
        assert_eq!(preview("short"), "short");

        let long = "a".repeat(40);
        let truncated = preview(&long);
        assert_eq!(truncated.chars().count(), PREVIEW_LENGTH + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn preview_counts_characters_not_bytes() {
        let content = "메".repeat(31);
        assert_eq!(preview(&content).chars().count(), PREVIEW_LENGTH + 3);
    }
}
