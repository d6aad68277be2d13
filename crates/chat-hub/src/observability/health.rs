//! Liveness and readiness endpoints.
//!
//! - `GET /health`: 200 while the process runs
//! - `GET /ready`: 200 with a hub status body once startup finished and
//!   while the dispatch loop answers; 503 otherwise, including during
//!   shutdown
//!
//! Readiness ignores the bus. A hub without fanout still serves its local
//! rooms, so it reports `fanout_enabled: false` instead of failing.

use crate::hub::HubHandle;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long `/ready` waits for the dispatch loop to answer.
const STATUS_TIMEOUT: Duration = Duration::from_millis(500);

/// Startup/shutdown flag read by `/ready`.
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    /// Not ready until [`Self::set_ready`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Stop advertising readiness so load balancers drain this instance.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct ProbeState {
    health: Arc<HealthState>,
    hub: HubHandle,
}

/// Body of a successful `/ready`.
#[derive(Debug, Serialize)]
struct ReadyBody {
    status: &'static str,
    fanout_enabled: bool,
    rooms: usize,
    connections: usize,
}

/// Router with `/health` and `/ready`.
pub fn health_router(health: Arc<HealthState>, hub: HubHandle) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness_handler))
        .with_state(ProbeState { health, hub })
}

async fn readiness_handler(
    State(state): State<ProbeState>,
) -> Result<Json<ReadyBody>, StatusCode> {
    if !state.health.is_ready() || state.hub.is_cancelled() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    match tokio::time::timeout(STATUS_TIMEOUT, state.hub.get_status()).await {
        Ok(Ok(status)) => Ok(Json(ReadyBody {
            status: "ready",
            fanout_enabled: status.fanout_enabled,
            rooms: status.room_count,
            connections: status.connection_count,
        })),
        Ok(Err(e)) => {
            debug!(target: "chat.health", error = %e, "Hub unavailable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            debug!(target: "chat.health", "Hub status timed out");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hub::{BroadcastEvent, HubConfig, HubMetrics};
    use crate::processor::MessageProcessor;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    struct Ignore;

    #[async_trait]
    impl MessageProcessor for Ignore {
        async fn process(&self, _event: BroadcastEvent) -> Option<BroadcastEvent> {
            None
        }
    }

    fn spawn_hub() -> HubHandle {
        let (hub, _task) =
            HubHandle::spawn(HubConfig::default(), Arc::new(Ignore), None, HubMetrics::new());
        hub
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_is_ok_before_ready() {
        let app = health_router(Arc::new(HealthState::new()), spawn_hub());
        assert_eq!(get(app, "/health").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_reports_hub_status() {
        let health = Arc::new(HealthState::new());
        let hub = spawn_hub();
        let app = health_router(Arc::clone(&health), hub.clone());

        assert_eq!(
            get(app.clone(), "/ready").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        health.set_ready();
        let (status, body) = get(app.clone(), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["fanout_enabled"], false);
        assert_eq!(json["connections"], 0);

        health.set_not_ready();
        assert_eq!(get(app, "/ready").await.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_stopped_hub_is_not_ready() {
        let health = Arc::new(HealthState::new());
        health.set_ready();
        let hub = spawn_hub();
        let app = health_router(health, hub.clone());

        hub.cancel();
        assert_eq!(get(app, "/ready").await.0, StatusCode::SERVICE_UNAVAILABLE);
    }
}
