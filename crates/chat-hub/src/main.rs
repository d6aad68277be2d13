//! Chat Hub
//!
//! Room-scoped WebSocket chat delivery, fanned out across instances over
//! Redis pub/sub.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to Postgres and verify the pool
//! 4. Connect to Redis if configured; otherwise (or on failure) run local-only
//! 5. Spawn the dispatch loop and, with Redis, the bus subscriber
//! 6. Serve WebSocket, health and metrics endpoints
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chat_hub::config::Config;
use chat_hub::fanout::{FanoutBridge, RedisBus};
use chat_hub::hub::{ConnectionConfig, HubConfig, HubHandle, HubMetrics};
use chat_hub::observability::{health_router, init_metrics_recorder, HealthState};
use chat_hub::processor::ChatMessageProcessor;
use chat_hub::repositories::PgChatStore;
use chat_hub::routes::{build_routes, AppState};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for the dispatch loop to stop after cancellation.
const HUB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Chat Hub");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        hub_id = %config.hub_id,
        bind_address = %config.bind_address,
        fanout_configured = config.redis.is_some(),
        hub_mailbox_capacity = config.hub_mailbox_capacity,
        connection_outbound_capacity = config.connection_outbound_capacity,
        max_message_bytes = config.max_message_bytes,
        eviction_notice = ?config.eviction_notice,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    info!("Connecting to database...");
    let connect_options = config.database.connect_options().map_err(|e| {
        error!(error = %e, "Invalid database settings");
        e
    })?;
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to database");
            e
        })?;
    let store = Arc::new(PgChatStore::new(pool));
    store.ping().await.map_err(|e| {
        error!(error = %e, "Database ping failed");
        e
    })?;
    info!("Database connection established");

    let metrics = HubMetrics::new();

    // Redis is optional: without it this instance serves its own rooms only
    let fanout = match &config.redis {
        None => {
            warn!("REDIS_URL not set, fanout disabled: running in local-only mode");
            None
        }
        Some(bus_settings) => {
            match RedisBus::connect(bus_settings, config.bus_connect_timeout).await {
                Ok(bus) => {
                    info!("Redis connection established, fanout enabled");
                    Some(Arc::new(FanoutBridge::new(
                        Arc::new(bus),
                        config.hub_id.clone(),
                        config.bus_publish_timeout,
                        Arc::clone(&metrics),
                    )))
                }
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, fanout disabled: running in local-only mode");
                    None
                }
            }
        }
    };

    let hub_config = HubConfig {
        hub_id: config.hub_id.clone(),
        mailbox_capacity: config.hub_mailbox_capacity,
        eviction_notice: config.eviction_notice,
    };
    let processor = Arc::new(ChatMessageProcessor::new(store.clone()));
    let (hub, hub_task) =
        HubHandle::spawn(hub_config, processor, fanout.clone(), Arc::clone(&metrics));

    let subscriber_task = fanout
        .as_ref()
        .map(|bridge| bridge.spawn_subscriber(hub.clone(), hub.child_token()));

    let state = Arc::new(AppState {
        hub: hub.clone(),
        rooms: store,
        jwt_secret: config.jwt_secret.clone(),
        connection: ConnectionConfig {
            outbound_capacity: config.connection_outbound_capacity,
        },
        max_message_bytes: config.max_message_bytes,
        metrics: Arc::clone(&metrics),
    });

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = build_routes(state)
        .merge(health_router(Arc::clone(&health_state), hub.clone()))
        .merge(metrics_router);

    // Bind listener before reporting ready to fail fast on bind errors
    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind server");
        format!("Failed to bind server to {addr}: {e}")
    })?;

    health_state.set_ready();
    info!(addr = %addr, "Chat Hub listening");

    let shutdown_health = Arc::clone(&health_state);
    let shutdown_hub = hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");
            // Mark as not ready immediately so load balancers stop routing
            shutdown_health.set_not_ready();
            // Closing the hub ends every connection, letting upgraded
            // requests finish
            shutdown_hub.cancel();
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Server failed");
            e
        })?;

    hub.cancel();
    if let Some(task) = subscriber_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Bus subscriber task failed");
        }
    }
    match tokio::time::timeout(HUB_SHUTDOWN_TIMEOUT, hub_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Hub task failed"),
        Err(_) => warn!("Hub did not stop within shutdown timeout"),
    }

    info!("Chat Hub shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
