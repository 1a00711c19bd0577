use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use hyper::{Body, Request, Response, StatusCode};
use hyper_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use hyper_tungstenite::tungstenite::protocol::CloseFrame;
use hyper_tungstenite::tungstenite::Message;
use hyper_tungstenite::HyperWebsocket;
use tokio::select;
use tokio::sync::broadcast::error::RecvError;

use super::super::error::{Result, ResultExt, RouteError};
use super::super::identity::{identity, Identity};
use super::messages::SendMessageRequest;
use super::{global, param_i64};
use crate::database::ChatRoom;
use crate::global::GlobalState;
use crate::producer;

/// Upgrades to the room's live connection: outbound frames are delivery
/// payloads from the fan-out hub, inbound frames are send requests that go
/// through the same producer path as REST sends.
pub async fn subscribe(mut req: Request<Body>) -> Result<Response<Body>> {
    let global = global(&req);
    let caller = identity(&req)?;
    let room_id = param_i64(&req, "roomId")?;

    if !hyper_tungstenite::is_upgrade_request(&req) {
        return Err((StatusCode::BAD_REQUEST, "expected a websocket upgrade").into());
    }

    // Subscribing to a room that does not exist would otherwise silently
    // deliver nothing.
    ChatRoom::get(global.shards.primary(), room_id)
        .await
        .extend_route((StatusCode::INTERNAL_SERVER_ERROR, "failed to load room"))?
        .ok_or((StatusCode::NOT_FOUND, "chat room not found"))?;

    let (response, websocket) = hyper_tungstenite::upgrade(&mut req, None)
        .map_err(|err| RouteError::from((StatusCode::BAD_REQUEST, "failed to upgrade", err)))?;

    tokio::spawn(serve_room_socket(global, websocket, room_id, caller));

    Ok(response)
}

async fn serve_room_socket(
    global: Arc<GlobalState>,
    websocket: HyperWebsocket,
    room_id: i64,
    caller: Identity,
) {
    let ws = match websocket.await {
        Ok(ws) => ws,
        Err(err) => {
            tracing::error!(error = %err, "failed to upgrade websocket request");
            return;
        }
    };

    let (mut tx, mut rx) = ws.split();

    if let Err(err) = global.presence.set_online(caller.user_id).await {
        tracing::warn!(user_id = caller.user_id, error = %err, "failed to mark user online");
    }

    let mut subscription = global.subscriptions.subscribe(room_id);

    tracing::debug!(room_id, user_id = caller.user_id, "websocket subscriber connected");

    loop {
        select! {
            _ = global.ctx.cancelled() => {
                tx.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Restart,
                    reason: "server is restarting".into(),
                })))
                .await
                .ok();
                break;
            }
            delivery = subscription.recv() => match delivery {
                Ok(delivery) => {
                    let frame = match serde_json::to_string(&delivery) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize delivery payload");
                            continue;
                        }
                    };

                    if tx.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                // This subscriber fell behind its bounded buffer; the dropped
                // payloads are recoverable from history.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room_id, user_id = caller.user_id, skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            frame = rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_inbound(&global, room_id, &caller, text.as_bytes());
                }
                Some(Ok(Message::Binary(payload))) => {
                    handle_inbound(&global, room_id, &caller, &payload);
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong is handled by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "websocket read failed");
                    break;
                }
            },
        }
    }

    drop(subscription);

    if let Err(err) = global.presence.set_offline(caller.user_id).await {
        tracing::warn!(user_id = caller.user_id, error = %err, "failed to mark user offline");
    }

    tracing::debug!(room_id, user_id = caller.user_id, "websocket subscriber disconnected");
}

/// An inbound frame is a send request; it is normalized into the same event
/// shape as the REST path. Malformed frames are dropped, they never tear the
/// connection down.
fn handle_inbound(global: &Arc<GlobalState>, room_id: i64, caller: &Identity, payload: &[u8]) {
    let request: SendMessageRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(room_id, error = %err, "ignoring malformed websocket frame");
            return;
        }
    };

    match request.into_event(room_id, caller) {
        Ok(event) => producer::publish(global, event),
        Err(reason) => {
            tracing::debug!(room_id, reason, "rejected websocket send request");
        }
    }
}
