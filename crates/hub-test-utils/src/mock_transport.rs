//! Channel-backed duplex transport for `ConnectionActor` tests.
//!
//! `MockTransport::pair()` returns the client end, driven by the test, and
//! the server end, handed to `ConnectionActor::spawn`.
//!
//! # Example
//!
//! ```rust,ignore
//! use hub_test_utils::MockTransport;
//!
//! let (mut client, transport) = MockTransport::pair();
//! let (handle, task) = ConnectionActor::spawn(
//!     identity, transport.sink, transport.stream, hub, config, metrics,
//! );
//! client.send_text("{\"type\":\"typing\",\"room_id\":\"r1\"}");
//! let frame = client.recv().await.unwrap();
//! ```

use bytes::Bytes;
use chat_hub::errors::HubError;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use std::time::Duration;

/// How long [`TestClient::recv`] waits before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Server end of a mock transport.
pub struct MockTransport {
    /// Frames written by the actor.
    pub sink: UnboundedSender<Bytes>,
    /// Frames read by the actor.
    pub stream: UnboundedReceiver<Result<Bytes, HubError>>,
}

impl MockTransport {
    /// Create a connected client/server pair.
    #[must_use]
    pub fn pair() -> (TestClient, MockTransport) {
        let (to_server, stream) = mpsc::unbounded();
        let (sink, from_server) = mpsc::unbounded();
        (
            TestClient {
                to_server,
                from_server,
            },
            MockTransport { sink, stream },
        )
    }
}

/// Client end of a mock transport.
pub struct TestClient {
    to_server: UnboundedSender<Result<Bytes, HubError>>,
    from_server: UnboundedReceiver<Bytes>,
}

impl TestClient {
    /// Send one frame to the server.
    pub fn send_text(&self, frame: &str) {
        self.to_server
            .unbounded_send(Ok(Bytes::from(frame.to_string())))
            .expect("server end dropped");
    }

    /// Make the server's next read fail.
    pub fn send_error(&self) {
        self.to_server
            .unbounded_send(Err(HubError::Transport("mock read failure".to_string())))
            .expect("server end dropped");
    }

    /// End the server's read stream, as a client close would.
    pub fn close(&self) {
        self.to_server.close_channel();
    }

    /// Next frame from the server; `None` if the server closed the
    /// transport or nothing arrived within [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::time::timeout(RECV_TIMEOUT, self.from_server.next())
            .await
            .ok()
            .flatten()
    }

    /// Next frame decoded as JSON. Panics if none arrives.
    pub async fn recv_json(&mut self) -> serde_json::Value {
        let frame = self.recv().await.expect("no frame received");
        serde_json::from_slice(&frame).expect("frame is not JSON")
    }

    /// A frame that is already waiting, without blocking.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.from_server.try_next().ok().flatten()
    }

    /// Wait until the server closes its write side.
    ///
    /// Returns `false` on timeout. Frames still queued are discarded.
    pub async fn wait_closed(&mut self) -> bool {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.from_server.next().await.is_some() {}
        })
        .await
        .is_ok()
    }
}
