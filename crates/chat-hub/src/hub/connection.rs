//! `ConnectionActor` - one per accepted client transport.
//!
//! Each actor runs two loops:
//! - inbound: reads frames from the transport and submits them to the hub
//!   as unprocessed broadcast events
//! - outbound: drains the connection's bounded queue into the transport
//!
//! The hub holds the only sender of the outbound queue. When the hub drops
//! it (unregister, eviction or shutdown) the outbound loop ends, which
//! cancels the inbound loop. When the inbound loop ends first (client
//! closed, read error) the actor unregisters itself.
//!
//! The actor is generic over the transport so the same code runs over
//! WebSockets and in-memory test channels.

use super::dispatcher::HubHandle;
use super::event::BroadcastEvent;
use super::messages::{ConnectionId, Registration};
use super::metrics::HubMetrics;
use crate::errors::HubError;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Who is on the other end of a connection. Established by the acceptor
/// before the actor exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub connection_id: ConnectionId,
    pub room_id: String,
    pub user_id: String,
}

impl ConnectionIdentity {
    /// Identity with a fresh connection id.
    #[must_use]
    pub fn new(room_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4(),
            room_id: room_id.into(),
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Frames that may wait for a slow reader before it is evicted.
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: crate::config::DEFAULT_CONNECTION_OUTBOUND_CAPACITY,
        }
    }
}

/// Handle to a running `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    connection_id: ConnectionId,
    cancel_token: CancellationToken,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Close the connection. The actor unregisters before exiting.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

pub struct ConnectionActor<Si, St> {
    identity: ConnectionIdentity,
    sink: Si,
    stream: St,
    hub: HubHandle,
    config: ConnectionConfig,
    cancel_token: CancellationToken,
    metrics: Arc<HubMetrics>,
}

impl<Si, St> ConnectionActor<Si, St>
where
    Si: Sink<Bytes> + Send + Unpin + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Bytes, HubError>> + Send + Unpin + 'static,
{
    /// Spawn an actor for an accepted transport.
    ///
    /// The actor's token is a child of the hub's, so stopping the hub
    /// closes every connection.
    pub fn spawn(
        identity: ConnectionIdentity,
        sink: Si,
        stream: St,
        hub: HubHandle,
        config: ConnectionConfig,
        metrics: Arc<HubMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let cancel_token = hub.child_token();
        let handle = ConnectionActorHandle {
            connection_id: identity.connection_id,
            cancel_token: cancel_token.clone(),
        };

        metrics.connection_opened();

        let actor = Self {
            identity,
            sink,
            stream,
            hub,
            config,
            cancel_token,
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());
        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "chat.connection",
        fields(
            connection_id = %self.identity.connection_id,
            room_id = %self.identity.room_id,
            user_id = %self.identity.user_id
        )
    )]
    async fn run(self) {
        let Self {
            identity,
            sink,
            stream,
            hub,
            config,
            cancel_token,
            metrics,
        } = self;

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));

        let registration = Registration {
            connection_id: identity.connection_id,
            room_id: identity.room_id.clone(),
            user_id: identity.user_id.clone(),
            outbound: outbound_tx,
        };

        if let Err(e) = hub.register(registration).await {
            warn!(target: "chat.connection", error = %e, "Failed to register connection");
            metrics.connection_closed();
            return;
        }

        info!(target: "chat.connection", "Connection registered");

        let writer = tokio::spawn(write_loop(sink, outbound_rx, cancel_token.clone()));
        let frames = read_loop(stream, &identity, &hub, &cancel_token).await;

        if let Err(e) = hub
            .unregister(identity.room_id.clone(), identity.connection_id)
            .await
        {
            debug!(target: "chat.connection", error = %e, "Hub gone before unregister");
        }

        let written = writer.await.unwrap_or_else(|e| {
            warn!(target: "chat.connection", error = %e, "Write loop panicked");
            0
        });

        metrics.connection_closed();
        info!(
            target: "chat.connection",
            frames_received = frames,
            frames_sent = written,
            "Connection closed"
        );
    }
}

/// Forward client frames to the hub until the transport ends or the actor
/// is cancelled. Returns the number of frames forwarded.
async fn read_loop<St>(
    mut stream: St,
    identity: &ConnectionIdentity,
    hub: &HubHandle,
    cancel_token: &CancellationToken,
) -> u64
where
    St: Stream<Item = Result<Bytes, HubError>> + Unpin,
{
    let mut forwarded = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                let event = BroadcastEvent::from_client(
                    identity.room_id.clone(),
                    identity.user_id.clone(),
                    frame,
                );
                if hub.broadcast(event).await.is_err() {
                    debug!(target: "chat.connection", "Hub unavailable, closing connection");
                    break;
                }
                forwarded += 1;
            }
            Some(Err(e)) => {
                debug!(target: "chat.connection", error = %e, "Transport read failed");
                break;
            }
            None => {
                debug!(target: "chat.connection", "Client closed transport");
                break;
            }
        }
    }

    cancel_token.cancel();
    forwarded
}

/// Write queued frames to the transport in order. Ends when the queue is
/// closed by the hub, a write fails, or the actor is cancelled; any of
/// these cancels the actor. Returns the number of frames written.
async fn write_loop<Si>(
    mut sink: Si,
    mut outbound: mpsc::Receiver<Bytes>,
    cancel_token: CancellationToken,
) -> u64
where
    Si: Sink<Bytes> + Unpin,
    Si::Error: Display,
{
    let mut written = 0;

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            frame = outbound.recv() => frame,
        };

        let Some(frame) = frame else {
            debug!(target: "chat.connection", "Outbound queue closed by hub");
            break;
        };

        if let Err(e) = sink.send(frame).await {
            debug!(target: "chat.connection", error = %e, "Transport write failed");
            break;
        }
        written += 1;
    }

    cancel_token.cancel();
    if let Err(e) = sink.close().await {
        debug!(target: "chat.connection", error = %e, "Transport close failed");
    }
    written
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hub::dispatcher::HubConfig;
    use crate::processor::MessageProcessor;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use std::time::Duration;

    struct PassThrough;

    #[async_trait]
    impl MessageProcessor for PassThrough {
        async fn process(&self, event: BroadcastEvent) -> Option<BroadcastEvent> {
            Some(BroadcastEvent::processed(event.room_id, event.message))
        }
    }

    struct Client {
        to_server: fmpsc::UnboundedSender<Result<Bytes, HubError>>,
        from_server: fmpsc::UnboundedReceiver<Bytes>,
    }

    fn connect(
        hub: &HubHandle,
        room: &str,
        user: &str,
        metrics: &Arc<HubMetrics>,
    ) -> (Client, ConnectionActorHandle, JoinHandle<()>) {
        let (to_server, server_stream) = fmpsc::unbounded();
        let (server_sink, from_server) = fmpsc::unbounded();
        let (handle, task) = ConnectionActor::spawn(
            ConnectionIdentity::new(room, user),
            server_sink,
            server_stream,
            hub.clone(),
            ConnectionConfig::default(),
            Arc::clone(metrics),
        );
        (
            Client {
                to_server,
                from_server,
            },
            handle,
            task,
        )
    }

    async fn wait_for_room_size(hub: &HubHandle, room: &str, size: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.room_size(room).await.unwrap() != size {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("room size not reached");
    }

    #[tokio::test]
    async fn test_frames_are_relayed_between_connections() {
        let metrics = HubMetrics::new();
        let (hub, _) =
            HubHandle::spawn(HubConfig::default(), Arc::new(PassThrough), None, Arc::clone(&metrics));

        let (alice, _, _) = connect(&hub, "r1", "alice", &metrics);
        let (mut bob, _, _) = connect(&hub, "r1", "bob", &metrics);
        wait_for_room_size(&hub, "r1", 2).await;

        alice
            .to_server
            .unbounded_send(Ok(Bytes::from_static(b"hello")))
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), bob.from_server.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, Bytes::from_static(b"hello"));
        assert_eq!(metrics.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_client_close_unregisters() {
        let metrics = HubMetrics::new();
        let (hub, _) =
            HubHandle::spawn(HubConfig::default(), Arc::new(PassThrough), None, Arc::clone(&metrics));

        let (client, _, task) = connect(&hub, "r1", "alice", &metrics);
        wait_for_room_size(&hub, "r1", 1).await;

        drop(client.to_server);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(hub.room_size("r1").await.unwrap(), 0);
        assert_eq!(metrics.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_transport() {
        let metrics = HubMetrics::new();
        let (hub, _) =
            HubHandle::spawn(HubConfig::default(), Arc::new(PassThrough), None, Arc::clone(&metrics));

        let (mut client, handle, task) = connect(&hub, "r1", "alice", &metrics);
        wait_for_room_size(&hub, "r1", 1).await;

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert!(client.from_server.next().await.is_none());
        assert_eq!(hub.room_size("r1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hub_shutdown_closes_connections() {
        let metrics = HubMetrics::new();
        let (hub, _) =
            HubHandle::spawn(HubConfig::default(), Arc::new(PassThrough), None, Arc::clone(&metrics));

        let (_client, handle, task) = connect(&hub, "r1", "alice", &metrics);
        wait_for_room_size(&hub, "r1", 1).await;

        hub.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert!(handle.is_cancelled());
        assert_eq!(metrics.connection_count(), 0);
    }
}
