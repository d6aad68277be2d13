//! In-memory persistence mocks.
//!
//! # Example
//!
//! ```rust,ignore
//! use hub_test_utils::{MockMessageStore, MockRoomAccess};
//!
//! let store = MockMessageStore::new().with_username(user_id, "alice");
//! let rooms = MockRoomAccess::new().with_member(room_id, user_id);
//!
//! // ... drive the hub ...
//! assert_eq!(store.call_count(), 1);
//! ```

use async_trait::async_trait;
use chat_hub::errors::HubError;
use chat_hub::protocol::PersistedMessage;
use chat_hub::repositories::{MessageStore, RoomAccess, RoomAccessDecision};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One `create_message` call as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub message_type: String,
}

#[derive(Debug, Default)]
struct StoreInner {
    calls: Vec<StoredMessage>,
    usernames: HashMap<Uuid, String>,
    failing: bool,
}

/// `MessageStore` that records every call and answers from memory.
#[derive(Debug, Clone, Default)]
pub struct MockMessageStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MockMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `username` for messages written by `user_id`.
    #[must_use]
    pub fn with_username(self, user_id: Uuid, username: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .usernames
            .insert(user_id, username.to_string());
        self
    }

    /// Fail every call with a database error (calls are still recorded).
    #[must_use]
    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<StoredMessage> {
        self.inner.lock().unwrap().calls.clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn create_message(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        content: &str,
        message_type: &str,
    ) -> Result<PersistedMessage, HubError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(StoredMessage {
            room_id,
            user_id,
            content: content.to_string(),
            message_type: message_type.to_string(),
        });

        if inner.failing {
            return Err(HubError::Database("mock store failure".to_string()));
        }

        Ok(PersistedMessage {
            id: Uuid::new_v4(),
            room_id,
            user_id,
            content: content.to_string(),
            message_type: message_type.to_string(),
            created_at: chrono::Utc::now(),
            username: inner.usernames.get(&user_id).cloned(),
        })
    }
}

#[derive(Debug, Default)]
struct RoomsInner {
    /// room -> members (the creator counts as a member)
    rooms: HashMap<Uuid, HashSet<Uuid>>,
    failing: bool,
}

/// `RoomAccess` answering from an in-memory membership table.
#[derive(Debug, Clone, Default)]
pub struct MockRoomAccess {
    inner: Arc<Mutex<RoomsInner>>,
}

impl MockRoomAccess {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `room_id` with no members.
    #[must_use]
    pub fn with_room(self, room_id: Uuid) -> Self {
        self.inner
            .lock()
            .unwrap()
            .rooms
            .entry(room_id)
            .or_default();
        self
    }

    /// Create `room_id` if needed and add `user_id` to it.
    #[must_use]
    pub fn with_member(self, room_id: Uuid, user_id: Uuid) -> Self {
        self.inner
            .lock()
            .unwrap()
            .rooms
            .entry(room_id)
            .or_default()
            .insert(user_id);
        self
    }

    /// Fail every check with a database error.
    #[must_use]
    pub fn failing(self) -> Self {
        self.inner.lock().unwrap().failing = true;
        self
    }
}

#[async_trait]
impl RoomAccess for MockRoomAccess {
    async fn check_access(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<RoomAccessDecision, HubError> {
        let inner = self.inner.lock().unwrap();
        if inner.failing {
            return Err(HubError::Database("mock room lookup failure".to_string()));
        }

        Ok(match inner.rooms.get(&room_id) {
            None => RoomAccessDecision::RoomNotFound,
            Some(members) if members.contains(&user_id) => RoomAccessDecision::Member,
            Some(_) => RoomAccessDecision::NotMember,
        })
    }
}
