use std::sync::Arc;

use crate::events::ChatMessageEvent;
use crate::global::GlobalState;

/// Publishes a chat-send event to the durable log, keyed by the event's room
/// so the log preserves per-room order.
///
/// Fire-and-forget by contract: the caller returns immediately and is never
/// told about a failure. A serialization or transport error means the message
/// is lost from the sender's perspective, observable only in the logs.
pub fn publish(global: &Arc<GlobalState>, event: ChatMessageEvent) {
    let payload = match event.encode() {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(
                room_id = event.chat_room_id,
                error = %err,
                "failed to serialize chat event, message dropped"
            );
            return;
        }
    };

    let subject = event.subject(global.config.message_log.partitions);
    let global = global.clone();

    tokio::spawn(async move {
        match global.jetstream.publish(subject.clone(), payload.into()).await {
            Ok(ack) => match ack.await {
                Ok(ack) => {
                    tracing::debug!(
                        subject = %subject,
                        sequence = ack.sequence,
                        room_id = event.chat_room_id,
                        "published chat event"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        room_id = event.chat_room_id,
                        error = %err,
                        "chat event was not acknowledged, message dropped"
                    );
                }
            },
            Err(err) => {
                tracing::error!(
                    room_id = event.chat_room_id,
                    error = %err,
                    "failed to publish chat event, message dropped"
                );
            }
        }
    });
}
