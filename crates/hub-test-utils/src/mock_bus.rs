//! In-memory pub/sub bus.
//!
//! Clones share one channel, so several hubs built on clones of the same
//! `InMemoryBus` see each other's publishes the way instances sharing a
//! Redis server do.
//!
//! # Example
//!
//! ```rust,ignore
//! use hub_test_utils::InMemoryBus;
//!
//! let bus = InMemoryBus::new();
//! let bridge_a = FanoutBridge::new(Arc::new(bus.clone()), "hub-a", timeout, metrics_a);
//! let bridge_b = FanoutBridge::new(Arc::new(bus.clone()), "hub-b", timeout, metrics_b);
//!
//! // ... later
//! assert_eq!(bus.published().len(), 1);
//! bus.disconnect_subscribers(); // simulate a dropped subscription
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chat_hub::errors::HubError;
use chat_hub::fanout::{Bus, BusMessage};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct BusInner {
    sender: Mutex<broadcast::Sender<BusMessage>>,
    published: Mutex<Vec<BusMessage>>,
    failing_publish: AtomicBool,
    failing_subscribe: AtomicBool,
    subscriptions: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                sender: Mutex::new(sender),
                published: Mutex::new(Vec::new()),
                failing_publish: AtomicBool::new(false),
                failing_subscribe: AtomicBool::new(false),
                subscriptions: AtomicUsize::new(0),
            }),
        }
    }

    /// Every message published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<BusMessage> {
        self.inner.published.lock().unwrap().clone()
    }

    /// Make `publish` fail (nothing is recorded or delivered while set).
    pub fn set_failing_publish(&self, failing: bool) {
        self.inner.failing_publish.store(failing, Ordering::SeqCst);
    }

    /// Make `subscribe_pattern` fail while set.
    pub fn set_failing_subscribe(&self, failing: bool) {
        self.inner.failing_subscribe.store(failing, Ordering::SeqCst);
    }

    /// Number of successful `subscribe_pattern` calls.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.load(Ordering::SeqCst)
    }

    /// End every open subscription stream. New subscriptions still work.
    pub fn disconnect_subscribers(&self) {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        *self.inner.sender.lock().unwrap() = sender;
    }

    /// Deliver a raw message to subscribers without recording it as a
    /// publish. Useful for injecting malformed payloads.
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        let _ = self.inner.sender.lock().unwrap().send(BusMessage {
            topic: topic.to_string(),
            payload: payload.into(),
        });
    }
}

/// Redis-style glob match supporting a single trailing `*`.
fn pattern_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), HubError> {
        if self.inner.failing_publish.load(Ordering::SeqCst) {
            return Err(HubError::Bus("mock bus publish failure".to_string()));
        }

        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };
        self.inner.published.lock().unwrap().push(message.clone());
        // No subscribers is not an error, same as Redis.
        let _ = self.inner.sender.lock().unwrap().send(message);
        Ok(())
    }

    async fn subscribe_pattern(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, BusMessage>, HubError> {
        if self.inner.failing_subscribe.load(Ordering::SeqCst) {
            return Err(HubError::Bus("mock bus subscribe failure".to_string()));
        }

        let receiver = self.inner.sender.lock().unwrap().subscribe();
        self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);

        let pattern = pattern.to_string();
        let messages = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |message| {
            let matched = pattern_matches(&pattern, &message.topic);
            async move { matched }
        });

        Ok(messages.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("chat:room:*", "chat:room:r1"));
        assert!(!pattern_matches("chat:room:*", "chat:user:r1"));
        assert!(pattern_matches("exact", "exact"));
        assert!(!pattern_matches("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_subscriber_sees_matching_publishes() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe_pattern("chat:room:*").await.unwrap();

        bus.publish("other:topic", Bytes::from_static(b"no")).await.unwrap();
        bus.publish("chat:room:r1", Bytes::from_static(b"yes")).await.unwrap();

        let message = sub.next().await.unwrap();
        assert_eq!(message.topic, "chat:room:r1");
        assert_eq!(bus.published().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_ends_streams() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe_pattern("chat:room:*").await.unwrap();

        bus.disconnect_subscribers();
        assert!(sub.next().await.is_none());
    }
}
