//! Chat hub error types.
//!
//! Errors that reach the WebSocket handshake are converted into HTTP
//! responses via `IntoResponse`. Messages returned to clients are generic;
//! the underlying cause is logged server-side.
//!
//! Errors inside the dispatch loop never leave it: the loop logs them and
//! moves on to the next event.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Chat hub error type.
///
/// HTTP mapping (handshake only):
/// - `InvalidToken`: 401
/// - `BadRequest`: 400
/// - `Forbidden`, `NotRoomMember`: 403
/// - `RoomNotFound`: 404
/// - `HubUnavailable`: 503
/// - everything else: 500
#[derive(Debug, Error)]
pub enum HubError {
    /// Postgres operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Pub/sub bus operation failed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Encoding or decoding a payload failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Reading from or writing to a client transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Access token missing or invalid.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Request is malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Caller may not perform this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// User is neither a member nor the creator of the room.
    #[error("User is not a member of this room")]
    NotRoomMember,

    /// The dispatch loop is gone (shutdown in progress).
    #[error("Hub is not running")]
    HubUnavailable,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            HubError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HubError::Forbidden(_) | HubError::NotRoomMember => StatusCode::FORBIDDEN,
            HubError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            HubError::HubUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            HubError::Database(_)
            | HubError::Bus(_)
            | HubError::Serialization(_)
            | HubError::Transport(_)
            | HubError::Config(_)
            | HubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            HubError::Database(_) => "DATABASE_ERROR",
            HubError::InvalidToken(_) => "INVALID_TOKEN",
            HubError::BadRequest(_) => "BAD_REQUEST",
            HubError::RoomNotFound(_) => "NOT_FOUND",
            HubError::Forbidden(_) | HubError::NotRoomMember => "FORBIDDEN",
            HubError::HubUnavailable => "SERVICE_UNAVAILABLE",
            HubError::Bus(_)
            | HubError::Serialization(_)
            | HubError::Transport(_)
            | HubError::Config(_)
            | HubError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            HubError::Database(_) => "An internal database error occurred".to_string(),
            HubError::Bus(_)
            | HubError::Serialization(_)
            | HubError::Transport(_)
            | HubError::Config(_)
            | HubError::Internal(_) => "An internal error occurred".to_string(),
            HubError::InvalidToken(reason)
            | HubError::BadRequest(reason)
            | HubError::Forbidden(reason) => reason.clone(),
            HubError::RoomNotFound(_) => "Room not found".to_string(),
            HubError::NotRoomMember => "You are not a member of this room".to_string(),
            HubError::HubUnavailable => "Service temporarily unavailable".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(target: "chat.errors", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"chat-hub\", error=\"invalid_token\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<sqlx::Error> for HubError {
    fn from(err: sqlx::Error) -> Self {
        HubError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for HubError {
    fn from(err: redis::RedisError) -> Self {
        HubError::Bus(err.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Serialization(err.to_string())
    }
}

impl From<common::jwt::JwtValidationError> for HubError {
    fn from(err: common::jwt::JwtValidationError) -> Self {
        HubError::InvalidToken(err.to_string())
    }
}
