use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_nats::jetstream::consumer::pull::MessagesErrorKind;
use async_nats::jetstream::AckKind;
use futures_util::StreamExt;
use tokio::select;

use crate::database::{ChatMessage, ChatRoom, ChatRoomMember, NewChatMessage, User};
use crate::events::{self, ChatMessageEvent};
use crate::global::GlobalState;
use crate::subscription::MessageDelivery;

/// Delay before a failed event is redelivered.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Runs the ingestion consumer: one serial worker per log partition, so
/// events for different rooms persist concurrently while a single room's
/// events stay in order.
pub async fn run(global: Arc<GlobalState>) -> anyhow::Result<()> {
    ensure_stream(&global).await?;

    tracing::info!(
        partitions = global.config.message_log.partitions,
        storage_shards = global.shards.count(),
        "starting ingestion consumer"
    );

    let mut workers = tokio::task::JoinSet::new();
    for partition in 0..global.config.message_log.partitions {
        workers.spawn(worker(global.clone(), partition));
    }

    while let Some(result) = workers.join_next().await {
        result.context("consumer worker panicked")??;
    }

    Ok(())
}

/// Creates the chat-send stream if it does not exist yet. Limits retention
/// with a max age: events older than the window are gone, by design.
async fn ensure_stream(
    global: &Arc<GlobalState>,
) -> anyhow::Result<async_nats::jetstream::stream::Stream> {
    let config = &global.config.message_log;

    global
        .jetstream
        .get_or_create_stream(async_nats::jetstream::stream::Config {
            name: events::STREAM_NAME.to_string(),
            subjects: events::all_subjects(config.partitions),
            max_age: config.max_age(),
            ..Default::default()
        })
        .await
        .context("failed to create chat-send stream")
}

async fn worker(global: Arc<GlobalState>, partition: usize) -> anyhow::Result<()> {
    let stream = ensure_stream(&global).await?;

    let name = format!("{}-{partition}", events::STREAM_NAME);
    let consumer = stream
        .get_or_create_consumer(
            &name,
            async_nats::jetstream::consumer::pull::Config {
                durable_name: Some(name.clone()),
                filter_subject: events::subject_for(partition),
                ..Default::default()
            },
        )
        .await
        .context("failed to create partition consumer")?;

    let mut messages = consumer
        .messages()
        .await
        .context("failed to subscribe to partition")?;

    tracing::info!(partition, "consumer worker started");

    loop {
        select! {
            _ = global.ctx.cancelled() => break,
            message = messages.next() => match message {
                Some(Ok(message)) => handle_message(&global, message).await,
                Some(Err(err)) if matches!(err.kind(), MessagesErrorKind::MissingHeartbeat) => {
                    tracing::warn!(partition, "missing heartbeat");
                }
                Some(Err(err)) => {
                    anyhow::bail!("partition {partition} message stream failed: {err:#}")
                }
                None => {
                    anyhow::bail!("partition {partition} message stream closed")
                }
            },
        }
    }

    Ok(())
}

/// Processes one logged event and acks it. Nothing here may take down the
/// worker: processing failures are NAKed for redelivery (persistence is
/// idempotent on the event id), poison payloads are acked away.
async fn handle_message(global: &Arc<GlobalState>, message: async_nats::jetstream::Message) {
    match handle_payload(global, &message.payload).await {
        Ok(()) => {
            if let Err(err) = message.ack().await {
                tracing::warn!(error = %err, "failed to ack chat event");
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to process chat event, requesting redelivery");
            if let Err(err) = message.ack_with(AckKind::Nak(Some(RETRY_DELAY))).await {
                tracing::warn!(error = %err, "failed to nak chat event");
            }
        }
    }
}

/// Decodes and processes a raw event payload. A payload that does not decode
/// is logged and dropped; the subscription must keep consuming whatever
/// comes after it.
pub(crate) async fn handle_payload(
    global: &Arc<GlobalState>,
    payload: &[u8],
) -> anyhow::Result<()> {
    let event = match ChatMessageEvent::decode(payload) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "dropping malformed chat event");
            return Ok(());
        }
    };

    process_event(global, event).await?;

    Ok(())
}

/// Persists an event and fans the stored message out to the room's live
/// subscribers.
///
/// This is also the synchronous entry point: call paths that need an
/// immediate in-process echo (system-generated messages) invoke it directly,
/// bypassing the log.
pub async fn process_event(
    global: &Arc<GlobalState>,
    event: ChatMessageEvent,
) -> anyhow::Result<MessageDelivery> {
    let message = ChatMessage::insert(&global.shards, &NewChatMessage::from_event(&event))
        .await
        .context("failed to persist chat message")?;

    tracing::debug!(
        message_id = message.id,
        room_id = message.chat_room_id,
        shard = %global.shards.id_for(message.chat_room_id),
        "persisted chat message"
    );

    // Sender display data, the room preview pointer and the read cursors all
    // live on the primary shard.
    let primary = global.shards.primary();

    let sender_avatar_url = User::find(primary, event.sender_id)
        .await
        .context("failed to load sender")?
        .and_then(|sender| sender.avatar_url);

    ChatRoom::set_last_message(primary, message.chat_room_id, message.id)
        .await
        .context("failed to update room preview")?;

    let unread_count =
        ChatRoomMember::unread_member_count(primary, message.chat_room_id, message.sent_at)
            .await
            .context("failed to count unread members")?;

    let delivery = MessageDelivery::new(
        &message,
        &event.sender_name,
        sender_avatar_url,
        unread_count,
    );

    if !delivery.mentions.is_empty() {
        // The notification service consumes mentions downstream.
        tracing::debug!(
            message_id = message.id,
            mentions = ?delivery.mentions,
            "message mentions users"
        );
    }

    let delivered_to = global
        .subscriptions
        .publish(message.chat_room_id, delivery.clone());

    tracing::debug!(
        message_id = message.id,
        room_id = message.chat_room_id,
        delivered_to,
        "broadcast chat message"
    );

    Ok(delivery)
}
