//! # Hub Test Utilities
//!
//! Mocks and fixtures for testing the chat hub without Postgres or Redis.
//!
//! ## Modules
//!
//! - `mock_store` - In-memory `MessageStore` and `RoomAccess`
//! - `mock_bus` - In-memory pub/sub `Bus` shared by several hubs
//! - `mock_transport` - Channel-backed duplex transport for connection actors
//! - `processors` - Trivial `MessageProcessor` implementations
//! - `fixtures` - Ids, client frames and user tokens
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hub_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let bus = InMemoryBus::new();
//!     let store = MockMessageStore::new();
//!     let (client, transport) = MockTransport::pair();
//!
//!     client.send_text(&chat_frame(&room_id, "hello"));
//!     // ...
//! }
//! ```

pub mod fixtures;
pub mod mock_bus;
pub mod mock_store;
pub mod mock_transport;
pub mod processors;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_bus::*;
pub use mock_store::*;
pub use mock_transport::*;
pub use processors::*;
