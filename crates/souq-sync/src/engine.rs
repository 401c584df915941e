//! # Sync Engine
//!
//! The connection manager and single owner of all mutable sync state.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Connection Manager States                            │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           ▼                           │
//! │        │              ┌────────────┐  ┌────────────┐                   │
//! │        │              │ Connected  │  │  Backoff   │                   │
//! │        │              └─────┬──────┘  └─────┬──────┘                   │
//! │        │                    │               │                           │
//! │        │        session lost│               │ timer expired             │
//! │        │        (not disconnect())          │ (attempts < budget)       │
//! │        │                    │               │                           │
//! │        └────────────────────┴───────◄───────┘                          │
//! │                                                                         │
//! │                     ┌────────────┐                                      │
//! │   budget exhausted  │   Failed   │  terminal until connect() is        │
//! │   ────────────────► │            │  called again                        │
//! │                     └────────────┘                                      │
//! │                                                                         │
//! │  BACKOFF: floor 1s, doubling, capped at 30s, no jitter.                │
//! │  Resets to the floor after any successful connection.                  │
//! │                                                                         │
//! │  ON CONNECT: reset retry counter ► send credential frame ►             │
//! │              drain outbound queue in FIFO order                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//! The engine runs as one spawned task that exclusively owns the transport
//! session, the outbound queue, and the writable [`SyncState`]. Producers
//! and the lifecycle API talk to it through the [`SyncHandle`] command
//! mailbox, so every transition and queue mutation is serialized through a
//! single point. `send()` is a bounded channel hand-off and never waits on
//! the network; `disconnect()` cancels in-flight attempts and pending
//! retry timers, and a cancelled attempt's late completion is discarded.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use souq_core::message::now_millis;
use souq_core::{ControlKind, EventKey, Message, MessageKind};

use crate::config::{validate_endpoint, SyncConfig};
use crate::dispatcher::{Dispatcher, Subscription, SyncEvent};
use crate::error::{SyncError, SyncResult};
use crate::queue::OutboundQueue;
use crate::state::{ConnectionQuality, ConnectionState, SyncState};
use crate::transport::{Connector, Session, WsConnector};

// =============================================================================
// Constants
// =============================================================================

/// Command mailbox capacity. Producers briefly await when the engine falls
/// this far behind; `try_send` callers get an error instead.
const COMMAND_BUFFER: usize = 128;

// =============================================================================
// Commands
// =============================================================================

/// Mailbox protocol between handles and the engine task.
enum Command {
    Connect {
        url: Url,
        token: String,
        ack: oneshot::Sender<SyncResult<()>>,
    },
    Disconnect,
    Send(Message),
    ResetSync,
    Shutdown,
}

type ConnectWaiters = Vec<oneshot::Sender<SyncResult<()>>>;

struct ConnectTarget {
    url: Url,
    token: String,
}

// =============================================================================
// Sync Handle
// =============================================================================

/// Cloneable handle to a running [`SyncEngine`].
///
/// This is the whole collaborator surface: producers call [`send`],
/// consumers call [`on_update`], status indicators read [`sync_state`],
/// and the host drives the lifecycle with [`connect`]/[`disconnect`].
///
/// [`send`]: SyncHandle::send
/// [`on_update`]: SyncHandle::on_update
/// [`sync_state`]: SyncHandle::sync_state
/// [`connect`]: SyncHandle::connect
/// [`disconnect`]: SyncHandle::disconnect
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<Command>,
    state: Arc<RwLock<SyncState>>,
    dispatcher: Dispatcher,
    config: Arc<SyncConfig>,
}

impl SyncHandle {
    /// Opens a session to `endpoint`, authenticating with `token` at the
    /// application layer. Suspends until the first attempt opens or fails;
    /// on failure the engine keeps retrying in the background with backoff.
    ///
    /// Idempotent while a session is open or an attempt is in flight: the
    /// call attaches to the existing session instead of opening a second
    /// one. Fails fast on a malformed endpoint.
    pub async fn connect(&self, endpoint: &str, token: &str) -> SyncResult<()> {
        let url = validate_endpoint(endpoint)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Connect {
                url,
                token: token.to_string(),
                ack: ack_tx,
            })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        ack_rx.await.map_err(|_| SyncError::ShuttingDown)?
    }

    /// [`connect`](SyncHandle::connect) against the endpoint from the
    /// configuration file.
    pub async fn connect_configured(&self, token: &str) -> SyncResult<()> {
        let endpoint = self
            .config
            .endpoint()
            .ok_or_else(|| SyncError::InvalidConfig("no sync endpoint configured".into()))?
            .to_string();
        self.connect(&endpoint, token).await
    }

    /// Tears the session down and suppresses automatic reconnection.
    /// Cancels any in-flight attempt and any pending retry timer.
    pub async fn disconnect(&self) -> SyncResult<()> {
        self.command_tx
            .send(Command::Disconnect)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Publishes a locally produced change. Forwarded immediately when
    /// connected, queued otherwise. There is no synchronous confirmation
    /// of remote durability - only the local hand-off outcome.
    pub async fn send(
        &self,
        kind: MessageKind,
        entity_type: &str,
        entity_id: &str,
        payload: Value,
    ) -> SyncResult<()> {
        let message = self.build_message(kind, entity_type, entity_id, payload);
        self.command_tx
            .send(Command::Send(message))
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Non-blocking variant of [`send`](SyncHandle::send) for callers that
    /// must never await (UI threads). Errors if the mailbox is full.
    pub fn try_send(
        &self,
        kind: MessageKind,
        entity_type: &str,
        entity_id: &str,
        payload: Value,
    ) -> SyncResult<()> {
        let message = self.build_message(kind, entity_type, entity_id, payload);
        self.command_tx
            .try_send(Command::Send(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    SyncError::ChannelError("command mailbox full".into())
                }
                mpsc::error::TrySendError::Closed(_) => SyncError::ShuttingDown,
            })
    }

    /// Discards queued changes and pending counters without delivery.
    /// For callers that have independently reconciled with a full re-sync
    /// fetch; connectivity is untouched.
    pub async fn reset_sync(&self) -> SyncResult<()> {
        self.command_tx
            .send(Command::ResetSync)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Stops the engine task for good.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.command_tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Registers a subscriber for inbound changes or engine notifications.
    pub fn on_update(
        &self,
        key: EventKey,
        callback: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.dispatcher.on_update(key, callback)
    }

    /// Returns a value snapshot of the current sync state.
    pub async fn sync_state(&self) -> SyncState {
        self.state.read().await.clone()
    }

    /// The configuration this engine was spawned with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn build_message(
        &self,
        kind: MessageKind,
        entity_type: &str,
        entity_id: &str,
        payload: Value,
    ) -> Message {
        Message::new(
            kind,
            entity_type,
            entity_id,
            payload,
            self.config.client_id(),
            &self.config.client.tenant_id,
        )
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// How a connect attempt resolved.
enum Attempt {
    Opened(Box<dyn Session>),
    Failed(SyncError),
    Cancelled,
    Shutdown,
}

/// How an open session ended.
enum SessionEnd {
    Lost,
    Halted,
    Shutdown,
}

/// How a backoff wait ended.
enum WaitOutcome {
    Elapsed,
    ConnectNow,
    Cancelled,
    Shutdown,
}

/// How a whole connect cycle ended.
enum CycleEnd {
    Halted,
    Shutdown,
}

/// The sync engine task. Construct with [`SyncEngine::spawn`]; all further
/// interaction goes through the returned [`SyncHandle`].
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    state: Arc<RwLock<SyncState>>,
    queue: OutboundQueue,
    command_rx: mpsc::Receiver<Command>,
}

impl SyncEngine {
    /// Spawns an engine over the production WebSocket transport.
    pub fn spawn(config: SyncConfig) -> SyncHandle {
        let connector = Arc::new(WsConnector::new(config.connect_timeout()));
        Self::spawn_with_connector(config, connector)
    }

    /// Spawns an engine over a custom [`Connector`]. This is the seam the
    /// test harness uses; production callers want [`SyncEngine::spawn`].
    pub fn spawn_with_connector(config: SyncConfig, connector: Arc<dyn Connector>) -> SyncHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let config = Arc::new(config);
        let state = Arc::new(RwLock::new(SyncState::default()));
        let dispatcher = Dispatcher::new();

        let engine = SyncEngine {
            config: config.clone(),
            connector,
            dispatcher: dispatcher.clone(),
            state: state.clone(),
            queue: OutboundQueue::new(config.sync.queue_warn_threshold),
            command_rx,
        };

        tokio::spawn(engine.run());

        SyncHandle {
            command_tx,
            state,
            dispatcher,
            config,
        }
    }

    /// Main engine loop: idle until a connect is requested, then run the
    /// connect cycle until it halts or the engine shuts down.
    async fn run(mut self) {
        info!(client_id = %self.config.client_id(), "Sync engine starting");

        loop {
            match self.command_rx.recv().await {
                None | Some(Command::Shutdown) => break,

                Some(Command::Connect { url, token, ack }) => {
                    let target = ConnectTarget { url, token };
                    let mut waiters: ConnectWaiters = vec![ack];
                    match self.connect_cycle(target, &mut waiters).await {
                        CycleEnd::Halted => {}
                        CycleEnd::Shutdown => break,
                    }
                }

                // While idle (including Failed), producers keep queueing.
                Some(Command::Send(message)) => self.enqueue(message).await,
                Some(Command::ResetSync) => self.reset_sync().await,
                Some(Command::Disconnect) => {}
            }
        }

        self.update_state(|s| {
            s.connection_state = ConnectionState::Disconnected;
            s.is_online = false;
            s.connection_quality = ConnectionQuality::Offline;
        })
        .await;
        info!("Sync engine stopped");
    }

    /// One connect cycle: attempt, run the session, retry with backoff,
    /// until deliberately halted, shut down, or the budget is exhausted.
    async fn connect_cycle(
        &mut self,
        mut target: ConnectTarget,
        waiters: &mut ConnectWaiters,
    ) -> CycleEnd {
        let mut backoff = create_backoff(&self.config);
        let mut failed_attempts: u32 = 0;
        let mut last_session: Option<Duration> = None;

        loop {
            self.update_state(|s| s.connection_state = ConnectionState::Connecting)
                .await;
            debug!(url = %target.url, attempt = failed_attempts + 1, "Opening session");

            match self.attempt(&target, waiters).await {
                Attempt::Opened(mut session) => {
                    let quality = ConnectionQuality::on_established(
                        failed_attempts,
                        last_session,
                        self.config.flap_window(),
                    );
                    info!(quality = %quality, "Session established");
                    failed_attempts = 0;
                    backoff.reset();

                    let opened_at = Instant::now();
                    let end = match self
                        .on_session_open(session.as_mut(), &target, quality, waiters)
                        .await
                    {
                        Ok(()) => self.connected_loop(session.as_mut()).await,
                        Err(e) => {
                            warn!(error = %e, "Session died during handshake/drain");
                            SessionEnd::Lost
                        }
                    };
                    last_session = Some(opened_at.elapsed());

                    match end {
                        SessionEnd::Lost => {
                            self.mark_offline().await;
                            info!("Session lost, scheduling reconnect");
                        }
                        SessionEnd::Halted => {
                            session.close().await;
                            self.mark_offline().await;
                            info!("Disconnected deliberately");
                            return CycleEnd::Halted;
                        }
                        SessionEnd::Shutdown => {
                            session.close().await;
                            return CycleEnd::Shutdown;
                        }
                    }
                }

                Attempt::Failed(e) => {
                    failed_attempts += 1;
                    warn!(error = %e, attempt = failed_attempts, "Connection attempt failed");
                    self.update_state(|s| {
                        s.connection_state = ConnectionState::Disconnected;
                        s.connection_quality = ConnectionQuality::Poor;
                    })
                    .await;
                    for ack in waiters.drain(..) {
                        let _ = ack.send(Err(SyncError::ConnectionFailed(e.to_string())));
                    }
                }

                Attempt::Cancelled => {
                    self.mark_offline().await;
                    info!("Connect attempt cancelled");
                    for ack in waiters.drain(..) {
                        let _ = ack.send(Err(SyncError::Disconnected));
                    }
                    return CycleEnd::Halted;
                }

                Attempt::Shutdown => return CycleEnd::Shutdown,
            }

            if failed_attempts >= self.config.sync.max_retries {
                self.enter_failed(failed_attempts).await;
                return CycleEnd::Halted;
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| self.config.max_backoff());
            debug!(?delay, "Waiting before reconnect");

            match self.backoff_wait(delay, &mut target, waiters).await {
                WaitOutcome::Elapsed => {}
                WaitOutcome::ConnectNow => {
                    // Explicit connect() restarts from the initial backoff.
                    failed_attempts = 0;
                    backoff.reset();
                }
                WaitOutcome::Cancelled => {
                    self.mark_offline().await;
                    info!("Pending retry cancelled");
                    return CycleEnd::Halted;
                }
                WaitOutcome::Shutdown => return CycleEnd::Shutdown,
            }
        }
    }

    /// Races one transport attempt against the command mailbox, so a
    /// `disconnect()` cancels the attempt (its late completion is simply
    /// dropped) and producers never stall.
    async fn attempt(&mut self, target: &ConnectTarget, waiters: &mut ConnectWaiters) -> Attempt {
        let connector = self.connector.clone();
        let mut connect_fut = connector.connect(&target.url);

        loop {
            tokio::select! {
                result = &mut connect_fut => {
                    return match result {
                        Ok(session) => Attempt::Opened(session),
                        Err(e) => Attempt::Failed(e),
                    };
                }
                cmd = self.command_rx.recv() => match cmd {
                    None | Some(Command::Shutdown) => return Attempt::Shutdown,
                    Some(Command::Disconnect) => return Attempt::Cancelled,
                    // Already connecting: attach to the in-flight attempt.
                    Some(Command::Connect { ack, .. }) => waiters.push(ack),
                    Some(Command::Send(message)) => self.enqueue(message).await,
                    Some(Command::ResetSync) => self.reset_sync().await,
                }
            }
        }
    }

    /// Post-handshake sequence: mark online, release connect waiters, send
    /// the credential frame, drain the queue.
    async fn on_session_open(
        &mut self,
        session: &mut dyn Session,
        target: &ConnectTarget,
        quality: ConnectionQuality,
        waiters: &mut ConnectWaiters,
    ) -> SyncResult<()> {
        self.update_state(|s| {
            s.connection_state = ConnectionState::Connected;
            s.is_online = true;
            s.connection_quality = quality;
        })
        .await;

        for ack in waiters.drain(..) {
            let _ = ack.send(Ok(()));
        }

        // Application-layer identity: the credential rides in the first
        // frame, not in a transport header.
        let auth = Message::auth_request(
            &target.token,
            self.config.client_id(),
            &self.config.client.tenant_id,
        );
        session.send(auth.to_json()?).await?;

        self.drain_queue(session).await
    }

    /// Steady connected state: route inbound frames, forward outbound
    /// messages, react to lifecycle commands.
    async fn connected_loop(&mut self, session: &mut dyn Session) -> SessionEnd {
        enum Step {
            Frame(Option<SyncResult<String>>),
            Cmd(Option<Command>),
        }

        loop {
            let step = tokio::select! {
                frame = session.recv() => Step::Frame(frame),
                cmd = self.command_rx.recv() => Step::Cmd(cmd),
            };

            match step {
                Step::Frame(None) => {
                    info!("Session closed by remote");
                    return SessionEnd::Lost;
                }
                Step::Frame(Some(Err(e))) => {
                    warn!(error = %e, "Transport error");
                    return SessionEnd::Lost;
                }
                Step::Frame(Some(Ok(text))) => self.handle_frame(&text).await,

                Step::Cmd(None) | Step::Cmd(Some(Command::Shutdown)) => {
                    return SessionEnd::Shutdown
                }
                Step::Cmd(Some(Command::Disconnect)) => return SessionEnd::Halted,
                Step::Cmd(Some(Command::Connect { ack, .. })) => {
                    // Already connected: no second session, no re-drain.
                    let _ = ack.send(Ok(()));
                }
                Step::Cmd(Some(Command::Send(message))) => {
                    if let Err(e) = self.forward(&mut *session, message).await {
                        warn!(error = %e, "Send failed, session presumed dead");
                        return SessionEnd::Lost;
                    }
                }
                Step::Cmd(Some(Command::ResetSync)) => self.reset_sync().await,
            }
        }
    }

    /// Parses and routes one inbound frame. A malformed frame is dropped
    /// with a diagnostic; it never tears the connection down.
    async fn handle_frame(&mut self, text: &str) {
        let message = match Message::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                let diag = SyncError::MalformedFrame(e.to_string());
                warn!(error = %diag, "Dropping malformed frame");
                return;
            }
        };

        self.update_state(|s| s.last_sync_time = now_millis()).await;

        // Loop suppression: never re-apply our own echoed change.
        if !message.origin_id.is_empty() && message.origin_id == self.config.client_id() {
            debug!(id = %message.id, "Suppressing echo of own change");
            return;
        }

        match message.kind {
            MessageKind::Update | MessageKind::Create | MessageKind::Delete => {
                debug!(
                    entity = %message.entity_type,
                    kind = %message.kind,
                    "Routing inbound change"
                );
                self.dispatcher.fan_out(&message);
            }
            MessageKind::SyncRequest => {
                debug!("Remote acknowledged sync request");
                self.dispatcher.notify_control(
                    ControlKind::SyncComplete,
                    SyncEvent::SyncComplete {
                        timestamp: message.timestamp,
                    },
                );
            }
        }
    }

    /// Flushes queued messages strictly in FIFO order, one at a time. On a
    /// failed send the message goes back to the front and the drain stops;
    /// already-sent messages are not requeued (at-least-once delivery).
    async fn drain_queue(&mut self, session: &mut dyn Session) -> SyncResult<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        info!(pending = self.queue.len(), "Draining outbound queue");

        while let Some(message) = self.queue.pop_front() {
            let frame = match message.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    error!(id = %message.id, error = %e, "Dropping unserializable queued message");
                    self.publish_pending().await;
                    continue;
                }
            };
            if let Err(e) = session.send(frame).await {
                self.queue.requeue_front(message);
                self.publish_pending().await;
                return Err(e);
            }
            debug!(id = %message.id, "Drained queued message");
            self.publish_pending().await;
        }
        Ok(())
    }

    /// Sends a locally produced message straight through the open session.
    async fn forward(
        &mut self,
        session: &mut dyn Session,
        message: Message,
    ) -> SyncResult<()> {
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(id = %message.id, error = %e, "Dropping unserializable message");
                return Ok(());
            }
        };
        if let Err(e) = session.send(frame).await {
            // The transport rejected it: keep it for the next drain.
            self.queue.requeue_front(message);
            self.publish_pending().await;
            return Err(e);
        }
        debug!(id = %message.id, kind = %message.kind, "Forwarded message");
        Ok(())
    }

    /// Buffers a message produced while no session is open.
    async fn enqueue(&mut self, message: Message) {
        debug!(id = %message.id, "Queueing message while offline");
        self.queue.push_back(message.clone());
        self.publish_pending().await;
        self.dispatcher
            .notify_control(ControlKind::MessageQueued, SyncEvent::Queued(message));
    }

    /// Explicit data-loss escape hatch: discard queued deltas after the
    /// caller has independently reconciled with a full re-sync fetch.
    async fn reset_sync(&mut self) {
        let discarded = self.queue.len();
        self.queue.clear();
        self.update_state(|s| {
            s.pending_changes = 0;
            s.last_sync_time = now_millis();
        })
        .await;
        if discarded > 0 {
            info!(discarded, "Sync state reset, queued changes discarded");
        }
    }

    /// Terminal failure: budget exhausted, notify subscribers exactly once.
    async fn enter_failed(&mut self, attempts: u32) {
        let err = SyncError::ConnectionExhausted { attempts };
        error!(error = %err, "Giving up on reconnection");
        self.update_state(|s| {
            s.connection_state = ConnectionState::Failed;
            s.is_online = false;
            s.connection_quality = ConnectionQuality::Offline;
        })
        .await;
        self.dispatcher
            .notify_control(ControlKind::ConnectionFailed, SyncEvent::ConnectionFailed);
    }

    /// Sleeps out the backoff delay while still honoring commands, so a
    /// `disconnect()` cancels the pending retry timer immediately.
    async fn backoff_wait(
        &mut self,
        delay: Duration,
        target: &mut ConnectTarget,
        waiters: &mut ConnectWaiters,
    ) -> WaitOutcome {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return WaitOutcome::Elapsed,
                cmd = self.command_rx.recv() => match cmd {
                    None | Some(Command::Shutdown) => return WaitOutcome::Shutdown,
                    Some(Command::Disconnect) => return WaitOutcome::Cancelled,
                    Some(Command::Connect { url, token, ack }) => {
                        *target = ConnectTarget { url, token };
                        waiters.push(ack);
                        return WaitOutcome::ConnectNow;
                    }
                    Some(Command::Send(message)) => self.enqueue(message).await,
                    Some(Command::ResetSync) => self.reset_sync().await,
                }
            }
        }
    }

    async fn mark_offline(&self) {
        self.update_state(|s| {
            s.connection_state = ConnectionState::Disconnected;
            s.is_online = false;
            s.connection_quality = ConnectionQuality::Offline;
        })
        .await;
    }

    async fn update_state(&self, mutate: impl FnOnce(&mut SyncState)) {
        mutate(&mut *self.state.write().await);
    }

    async fn publish_pending(&self) {
        let pending = self.queue.len();
        self.update_state(|s| s.pending_changes = pending).await;
    }
}

/// Deterministic exponential backoff: floor, doubling, cap.
fn create_backoff(config: &SyncConfig) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: config.initial_backoff(),
        max_interval: config.max_backoff(),
        multiplier: 2.0,
        // No jitter: consecutive retry delays must be non-decreasing.
        randomization_factor: 0.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

// =============================================================================
// Tests
// =============================================================================
