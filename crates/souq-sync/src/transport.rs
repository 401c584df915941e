//! # WebSocket Transport
//!
//! The transport seam between the connection manager and the wire.
//!
//! ## Why a Trait Seam
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Transport Layering                               │
//! │                                                                         │
//! │                     ┌──────────────────┐                                │
//! │                     │    SyncEngine    │   owns exactly one session     │
//! │                     └────────┬─────────┘   at a time                    │
//! │                              │                                          │
//! │                   Connector::connect(url)                               │
//! │                              │                                          │
//! │              ┌───────────────┴───────────────┐                          │
//! │              ▼                               ▼                          │
//! │     ┌────────────────┐             ┌──────────────────┐                 │
//! │     │  WsConnector   │             │  MockConnector   │                 │
//! │     │                │             │   (tests only)   │                 │
//! │     │ tokio-         │             │                  │                 │
//! │     │ tungstenite,   │             │ scripted accept/ │                 │
//! │     │ native TLS     │             │ refuse, channel- │                 │
//! │     │                │             │ backed sessions  │                 │
//! │     └────────────────┘             └──────────────────┘                 │
//! │                                                                         │
//! │  One frame = one serialized Message (text). Pings are answered at      │
//! │  this layer; the engine never sees keepalive traffic.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use std::time::Duration;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Transport Traits
// =============================================================================

/// An open transport session: text frames in both directions.
#[async_trait]
pub trait Session: Send {
    /// Sends one frame. An error means the session is dead and the frame
    /// was not delivered.
    async fn send(&mut self, frame: String) -> SyncResult<()>;

    /// Receives the next frame. `None` means the session closed.
    async fn recv(&mut self) -> Option<SyncResult<String>>;

    /// Closes the session gracefully. Errors are ignored; the session is
    /// unusable afterwards either way.
    async fn close(&mut self);
}

/// Opens transport sessions. The engine holds exactly one connector for
/// its whole lifetime and asks it for a fresh session on every attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> SyncResult<Box<dyn Session>>;
}

// =============================================================================
// WebSocket Connector
// =============================================================================

/// Production connector backed by tokio-tungstenite.
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        WsConnector { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> SyncResult<Box<dyn Session>> {
        match timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(Box::new(WsSession { stream }))
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.connect_timeout.as_secs())),
        }
    }
}

struct WsSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Session for WsSession {
    async fn send(&mut self, frame: String) -> SyncResult<()> {
        self.stream
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(SyncError::from)
    }

    async fn recv(&mut self) -> Option<SyncResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMessage::Ping(payload)) => {
                    // Keepalive is answered here, invisibly to the engine.
                    if let Err(e) = self.stream.send(WsMessage::Pong(payload)).await {
                        return Some(Err(SyncError::from(e)));
                    }
                }
                Ok(WsMessage::Pong(_)) => {
                    debug!("Received pong");
                }
                Ok(WsMessage::Close(frame)) => {
                    info!(?frame, "Received close frame");
                    return None;
                }
                Ok(WsMessage::Binary(_)) => {
                    warn!("Received unexpected binary frame, ignoring");
                }
                Ok(WsMessage::Frame(_)) => {
                    // Raw frame, ignore
                }
                Err(e) => return Some(Err(SyncError::from(e))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

// =============================================================================
// Mock Connector (test harness)
// =============================================================================

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory transport for engine tests.
    //!
    //! Every session created by a [`MockConnector`] writes the frames the
    //! engine sends into one shared channel, so a test observes the exact
    //! order the remote would, across reconnects.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Script for one accepted session.
    struct SessionScript {
        inbound_rx: mpsc::UnboundedReceiver<String>,
        /// `Some(n)`: the first `n` sends succeed, every later send fails.
        fail_sends_after: Option<usize>,
    }

    /// Connector whose connect outcomes are scripted by the test.
    /// With no script queued, every attempt is refused.
    pub(crate) struct MockConnector {
        scripts: Mutex<VecDeque<SessionScript>>,
        sent_tx: mpsc::UnboundedSender<String>,
        attempts: AtomicU32,
    }

    impl MockConnector {
        /// Returns the connector and the receiver observing every frame
        /// the engine hands to any of its sessions.
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let connector = Arc::new(MockConnector {
                scripts: Mutex::new(VecDeque::new()),
                sent_tx,
                attempts: AtomicU32::new(0),
            });
            (connector, sent_rx)
        }

        /// Scripts the next connect attempt to succeed. Returns the sender
        /// for injecting inbound frames; dropping it closes the session.
        pub(crate) fn accept_next(
            &self,
            fail_sends_after: Option<usize>,
        ) -> mpsc::UnboundedSender<String> {
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            self.scripts.lock().unwrap().push_back(SessionScript {
                inbound_rx,
                fail_sends_after,
            });
            inbound_tx
        }

        /// Number of connect attempts observed so far.
        pub(crate) fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _url: &Url) -> SyncResult<Box<dyn Session>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.scripts.lock().unwrap().pop_front() {
                Some(script) => Ok(Box::new(MockSession {
                    sent_tx: self.sent_tx.clone(),
                    inbound_rx: script.inbound_rx,
                    fail_sends_after: script.fail_sends_after,
                    sent: 0,
                })),
                None => Err(SyncError::ConnectionFailed("connection refused".into())),
            }
        }
    }

    struct MockSession {
        sent_tx: mpsc::UnboundedSender<String>,
        inbound_rx: mpsc::UnboundedReceiver<String>,
        fail_sends_after: Option<usize>,
        sent: usize,
    }

    #[async_trait]
    impl Session for MockSession {
        async fn send(&mut self, frame: String) -> SyncResult<()> {
            if self.fail_sends_after.is_some_and(|n| self.sent >= n) {
                return Err(SyncError::WebSocketError("send on broken pipe".into()));
            }
            self.sent += 1;
            self.sent_tx
                .send(frame)
                .map_err(|_| SyncError::Disconnected)
        }

        async fn recv(&mut self) -> Option<SyncResult<String>> {
            self.inbound_rx.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.inbound_rx.close();
        }
    }

    #[tokio::test]
    async fn test_mock_session_scripted_send_failure() {
        let (connector, mut sent_rx) = MockConnector::new();
        let _inbound = connector.accept_next(Some(1));

        let url = Url::parse("ws://mock.test/sync").unwrap();
        let mut session = connector.connect(&url).await.unwrap();
        assert_eq!(connector.attempts(), 1);

        session.send("first".into()).await.unwrap();
        assert!(session.send("second".into()).await.is_err());
        assert_eq!(sent_rx.recv().await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_mock_connector_refuses_without_script() {
        let (connector, _sent_rx) = MockConnector::new();
        let url = Url::parse("ws://mock.test/sync").unwrap();
        assert!(connector.connect(&url).await.is_err());
    }
}
