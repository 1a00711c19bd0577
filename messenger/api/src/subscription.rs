use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::database::{ChatMessage, MessageKind};

/// Per-subscriber buffer. A subscriber that falls further behind than this
/// loses its oldest payloads (`RecvError::Lagged`) instead of stalling the
/// publishing path.
const SUBSCRIBER_BUFFER: usize = 64;

/// What a room subscriber receives: the persisted message plus the sender's
/// display data and the unread-member indicator computed at delivery time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageDelivery {
    pub id: i64,
    pub chat_room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub sender_avatar_url: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_content_type: Option<String>,
    pub attachment_size: Option<i64>,
    pub mentions: Vec<i64>,
    pub sent_at: DateTime<Utc>,
    pub unread_count: i64,
}

impl MessageDelivery {
    pub fn new(
        message: &ChatMessage,
        sender_name: &str,
        sender_avatar_url: Option<String>,
        unread_count: i64,
    ) -> Self {
        Self {
            id: message.id,
            chat_room_id: message.chat_room_id,
            sender_id: message.sender_id,
            sender_name: sender_name.to_string(),
            sender_avatar_url,
            content: message.content.clone(),
            kind: message.kind,
            attachment_url: message.attachment_url.clone(),
            attachment_name: message.attachment_name.clone(),
            attachment_content_type: message.attachment_content_type.clone(),
            attachment_size: message.attachment_size,
            mentions: message.mentions.clone(),
            sent_at: message.sent_at,
            unread_count,
        }
    }
}

/// Live fan-out hub, keyed by room id.
///
/// Delivery goes to the subscribers connected at publish time only; there is
/// no backlog replay, a (re)connecting client covers the gap by fetching
/// history. Room entries are garbage-collected when their last subscriber
/// drops.
pub struct SubscriptionManager {
    topics: Mutex<HashMap<i64, broadcast::Sender<MessageDelivery>>>,
    capacity: usize,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::with_capacity(SUBSCRIBER_BUFFER)
    }
}

/// A live subscription to one room. Dropping it unsubscribes.
pub struct SubscriberReceiver<'a> {
    room_id: i64,
    rx: broadcast::Receiver<MessageDelivery>,
    manager: &'a SubscriptionManager,
}

impl Deref for SubscriberReceiver<'_> {
    type Target = broadcast::Receiver<MessageDelivery>;

    fn deref(&self) -> &Self::Target {
        &self.rx
    }
}

impl DerefMut for SubscriberReceiver<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.rx
    }
}

impl Drop for SubscriberReceiver<'_> {
    fn drop(&mut self) {
        let mut topics = self
            .manager
            .topics
            .lock()
            .expect("subscription registry poisoned");

        if let Some(tx) = topics.get(&self.room_id) {
            // Our receiver is still alive here, so a count of one means we
            // are the last subscriber of this room.
            if tx.receiver_count() <= 1 {
                topics.remove(&self.room_id);
            }
        }
    }
}

impl SubscriptionManager {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn subscribe(&self, room_id: i64) -> SubscriberReceiver<'_> {
        let mut topics = self.topics.lock().expect("subscription registry poisoned");

        let rx = topics
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        SubscriberReceiver {
            room_id,
            rx,
            manager: self,
        }
    }

    /// Delivers a payload to every current subscriber of the room. Returns
    /// how many subscribers received it; zero when nobody is listening.
    pub fn publish(&self, room_id: i64, payload: MessageDelivery) -> usize {
        let topics = self.topics.lock().expect("subscription registry poisoned");

        match topics.get(&room_id) {
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, room_id: i64) -> usize {
        let topics = self.topics.lock().expect("subscription registry poisoned");

        topics.get(&room_id).map_or(0, |tx| tx.receiver_count())
    }

    pub fn room_count(&self) -> usize {
        self.topics
            .lock()
            .expect("subscription registry poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    use super::*;

    fn delivery(room_id: i64, content: &str) -> MessageDelivery {
        MessageDelivery {
            id: 1,
            chat_room_id: room_id,
            sender_id: 42,
            sender_name: "ada".to_string(),
            sender_avatar_url: None,
            content: content.to_string(),
            kind: MessageKind::Text,
            attachment_url: None,
            attachment_name: None,
            attachment_content_type: None,
            attachment_size: None,
            mentions: Vec::new(),
            sent_at: Utc::now(),
            unread_count: 0,
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let manager = SubscriptionManager::default();
        let mut subscription = manager.subscribe(7);

        for content in ["e1", "e2", "e3"] {
            assert_eq!(manager.publish(7, delivery(7, content)), 1);
        }

        for expected in ["e1", "e2", "e3"] {
            let received = subscription.recv().await.expect("recv");
            assert_eq!(received.content, expected);
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_each_payload() {
        let manager = SubscriptionManager::default();
        let mut first = manager.subscribe(7);
        let mut second = manager.subscribe(7);

        assert_eq!(manager.publish(7, delivery(7, "hello")), 2);

        assert_eq!(first.recv().await.expect("recv").content, "hello");
        assert_eq!(second.recv().await.expect("recv").content, "hello");
    }

    #[tokio::test]
    async fn no_backlog_for_late_subscribers() {
        let manager = SubscriptionManager::default();

        {
            let _early = manager.subscribe(7);
            manager.publish(7, delivery(7, "missed"));
        }

        let mut late = manager.subscribe(7);
        assert_eq!(late.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn publish_without_subscribers_reaches_nobody() {
        let manager = SubscriptionManager::default();

        assert_eq!(manager.publish(7, delivery(7, "void")), 0);
        assert_eq!(manager.room_count(), 0);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let manager = SubscriptionManager::default();
        let mut other_room = manager.subscribe(8);

        manager.publish(7, delivery(7, "for room 7"));

        assert_eq!(other_room.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn dropping_the_last_subscriber_removes_the_room() {
        let manager = SubscriptionManager::default();

        let first = manager.subscribe(7);
        let second = manager.subscribe(7);
        assert_eq!(manager.subscriber_count(7), 2);

        drop(first);
        assert_eq!(manager.room_count(), 1);
        assert_eq!(manager.subscriber_count(7), 1);

        drop(second);
        assert_eq!(manager.room_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscribers_lose_oldest_payloads_only() {
        let manager = SubscriptionManager::with_capacity(2);
        let mut slow = manager.subscribe(7);

        for content in ["e1", "e2", "e3", "e4"] {
            manager.publish(7, delivery(7, content));
        }

        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(2))));
        assert_eq!(slow.recv().await.expect("recv").content, "e3");
        assert_eq!(slow.recv().await.expect("recv").content, "e4");
    }
}
