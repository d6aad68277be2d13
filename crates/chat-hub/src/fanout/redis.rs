//! Redis pub/sub bus.
//!
//! # Connection Pattern
//!
//! Publishing shares one `MultiplexedConnection`, cloned per call; it is
//! cheap to clone and safe to use concurrently. Each pattern subscription
//! opens its own dedicated pub/sub connection, since a connection in
//! subscribe mode cannot issue other commands.
//!
//! Connection parameters may carry a password and are never logged.

use super::{Bus, BusMessage};
use crate::errors::HubError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, IntoConnectionInfo};
use std::time::Duration;
use tracing::{debug, error, instrument};

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    publisher: MultiplexedConnection,
}

impl RedisBus {
    /// Open a client and verify the server answers `PING` within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Bus` if the parameters are invalid, the connection
    /// fails, or the server does not answer in time.
    pub async fn connect(
        params: impl IntoConnectionInfo,
        timeout: Duration,
    ) -> Result<Self, HubError> {
        let client = Client::open(params).map_err(|e| {
            error!(target: "chat.fanout", error = %e, "Failed to open Redis client");
            HubError::Bus(format!("Failed to open Redis client: {e}"))
        })?;

        let mut publisher = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| HubError::Bus("Timed out connecting to Redis".to_string()))?
            .map_err(|e| HubError::Bus(format!("Failed to connect to Redis: {e}")))?;

        let pong: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut publisher))
            .await
            .map_err(|_| HubError::Bus("Timed out waiting for PING reply".to_string()))??;

        debug!(target: "chat.fanout", reply = %pong, "Redis connectivity check passed");

        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Bus for RedisBus {
    #[instrument(skip_all, name = "chat.fanout.redis_publish", fields(topic = %topic))]
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), HubError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(topic, payload.as_ref()).await?;
        debug!(target: "chat.fanout", receivers = receivers, "Published to Redis");
        Ok(())
    }

    async fn subscribe_pattern(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, BusMessage>, HubError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;

        let stream = pubsub.into_on_message().map(|msg| BusMessage {
            topic: msg.get_channel_name().to_string(),
            payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
        });

        Ok(stream.boxed())
    }
}
