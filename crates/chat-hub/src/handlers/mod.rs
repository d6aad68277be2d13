//! HTTP handlers for the chat hub.

pub mod ws;

pub use ws::{authorize, bearer_token, ws_upgrade, WsAuthQuery};
