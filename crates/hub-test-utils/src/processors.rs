//! Trivial `MessageProcessor` implementations.

use async_trait::async_trait;
use chat_hub::hub::BroadcastEvent;
use chat_hub::processor::MessageProcessor;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Drops every event and counts how many it saw.
#[derive(Debug, Default)]
pub struct RejectingProcessor {
    calls: AtomicUsize,
}

impl RejectingProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageProcessor for RejectingProcessor {
    async fn process(&self, _event: BroadcastEvent) -> Option<BroadcastEvent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Marks every event processed without changing its payload.
#[derive(Debug, Default)]
pub struct PassThroughProcessor {
    calls: AtomicUsize,
}

impl PassThroughProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageProcessor for PassThroughProcessor {
    async fn process(&self, event: BroadcastEvent) -> Option<BroadcastEvent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(BroadcastEvent::processed(event.room_id, event.message))
    }
}
