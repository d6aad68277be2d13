//! WebSocket acceptor.
//!
//! `GET /ws/rooms/:room_id` authenticates the caller, checks room access and
//! upgrades the request. The upgraded socket is handed to a
//! [`ConnectionActor`]; nothing here touches the registry.
//!
//! # Authentication
//!
//! The access token is read from `Authorization: Bearer <jwt>` or, since
//! browsers cannot set headers on a WebSocket handshake, from `?token=`.
//! The header wins when both are present.
//!
//! # Handshake failures
//!
//! Rejected before the upgrade with a JSON error body:
//! - 401: token missing or invalid
//! - 400: room id is not a UUID
//! - 404: room does not exist
//! - 403: user is neither a member nor the creator
//! - 500: database error

use crate::errors::HubError;
use crate::hub::{ConnectionActor, ConnectionIdentity};
use crate::observability::metrics as prom;
use crate::repositories::RoomAccessDecision;
use crate::routes::AppState;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use common::jwt::{verify_user_token, UserClaims};
use common::secret::ExposeSecret;
use futures_util::future::ready;
use futures_util::stream::{BoxStream, StreamExt};
use futures_util::SinkExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Extract the access token from the `Authorization` header or the query.
#[must_use]
pub fn bearer_token<'a>(headers: &'a HeaderMap, query: &'a WsAuthQuery) -> Option<&'a str> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    from_header.or_else(|| query.token.as_deref().filter(|t| !t.is_empty()))
}

/// Run every handshake check that does not need the upgrade itself.
///
/// # Errors
///
/// - `HubError::InvalidToken` if the token is missing or fails verification
/// - `HubError::BadRequest` if `room_id` is not a UUID
/// - `HubError::RoomNotFound` / `HubError::NotRoomMember` from the access check
/// - `HubError::Database` if the access check fails
pub async fn authorize(
    state: &AppState,
    room_id: &str,
    token: Option<&str>,
) -> Result<(Uuid, UserClaims), HubError> {
    let token = token.ok_or_else(|| {
        debug!(target: "chat.ws", "Missing access token");
        HubError::InvalidToken("Missing access token".to_string())
    })?;

    let claims = verify_user_token(token, state.jwt_secret.expose_secret().as_bytes())?;

    let room_uuid = Uuid::parse_str(room_id)
        .map_err(|_| HubError::BadRequest("Invalid room id".to_string()))?;

    match state.rooms.check_access(room_uuid, claims.user_id).await? {
        RoomAccessDecision::Member => Ok((room_uuid, claims)),
        RoomAccessDecision::NotMember => Err(HubError::NotRoomMember),
        RoomAccessDecision::RoomNotFound => Err(HubError::RoomNotFound(room_id.to_string())),
    }
}

/// Handshake outcome label for metrics.
fn handshake_status(err: &HubError) -> &'static str {
    match err {
        HubError::InvalidToken(_) => "unauthorized",
        HubError::BadRequest(_) => "bad_request",
        HubError::RoomNotFound(_) => "not_found",
        HubError::NotRoomMember | HubError::Forbidden(_) => "forbidden",
        _ => "error",
    }
}

/// `GET /ws/rooms/:room_id`
///
/// The upgrade extractor's rejection is only surfaced after the caller has
/// been authorized, so unauthenticated clients always see 401.
#[instrument(skip_all, name = "chat.ws.upgrade", fields(room_id = %room_id))]
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let (room_uuid, claims) =
        match authorize(&state, &room_id, bearer_token(&headers, &query)).await {
            Ok(authorized) => authorized,
            Err(e) => {
                debug!(target: "chat.ws", error = %e, "Handshake rejected");
                prom::record_handshake(handshake_status(&e));
                return e.into_response();
            }
        };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(target: "chat.ws", error = %rejection, "Not a WebSocket upgrade request");
            prom::record_handshake("bad_request");
            return rejection.into_response();
        }
    };

    prom::record_handshake("accepted");
    info!(
        target: "chat.ws",
        user_id = %claims.user_id,
        "WebSocket connection authorized"
    );

    let identity = ConnectionIdentity::new(room_uuid.to_string(), claims.user_id.to_string());
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| serve_socket(socket, identity, state))
}

/// Hand an upgraded socket to a connection actor and wait for it to finish.
async fn serve_socket(socket: WebSocket, identity: ConnectionIdentity, state: Arc<AppState>) {
    let (sink, stream) = socket.split();

    // JSON envelopes go out as text frames; anything else as binary.
    let sink = sink.with(|frame: Bytes| {
        ready(Ok::<_, axum::Error>(match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        }))
    });

    let (_handle, task) = ConnectionActor::spawn(
        identity,
        sink,
        client_frames(stream),
        state.hub.clone(),
        state.connection,
        Arc::clone(&state.metrics),
    );

    if let Err(e) = task.await {
        warn!(target: "chat.ws", error = %e, "Connection task failed");
    }
}

/// Data frames from the client. Ends at the first close frame.
fn client_frames<S>(stream: S) -> BoxStream<'static, Result<Bytes, HubError>>
where
    S: futures_util::Stream<Item = Result<Message, axum::Error>> + Send + 'static,
{
    stream
        .take_while(|msg| ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Bytes::from(text))),
                Ok(Message::Binary(data)) => Some(Ok(Bytes::from(data))),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
                Err(e) => Some(Err(HubError::Transport(e.to_string()))),
            })
        })
        .boxed()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        let query = WsAuthQuery {
            token: Some("from-query".to_string()),
        };

        assert_eq!(bearer_token(&headers, &query), Some("from-header"));
    }

    #[test]
    fn test_bearer_token_falls_back_to_query() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        let query = WsAuthQuery {
            token: Some("from-query".to_string()),
        };

        assert_eq!(bearer_token(&headers, &query), Some("from-query"));
    }

    #[test]
    fn test_bearer_token_missing() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers, &WsAuthQuery::default()), None);

        let empty = WsAuthQuery {
            token: Some(String::new()),
        };
        assert_eq!(bearer_token(&headers, &empty), None);
    }

    #[tokio::test]
    async fn test_client_frames_stop_at_close() {
        let frames = futures_util::stream::iter(vec![
            Ok(Message::Text("a".to_string())),
            Ok(Message::Ping(vec![1])),
            Ok(Message::Binary(vec![0xff])),
            Ok(Message::Close(None)),
            Ok(Message::Text("after close".to_string())),
        ]);

        let collected: Vec<Bytes> = client_frames(frames)
            .map(|frame| frame.unwrap())
            .collect()
            .await;

        assert_eq!(
            collected,
            vec![Bytes::from_static(b"a"), Bytes::from_static(&[0xff])]
        );
    }

    #[test]
    fn test_handshake_status_labels() {
        assert_eq!(
            handshake_status(&HubError::InvalidToken("x".to_string())),
            "unauthorized"
        );
        assert_eq!(handshake_status(&HubError::NotRoomMember), "forbidden");
        assert_eq!(
            handshake_status(&HubError::RoomNotFound("r".to_string())),
            "not_found"
        );
        assert_eq!(
            handshake_status(&HubError::Database("x".to_string())),
            "error"
        );
    }
}
