//! # souq-sync: Realtime Sync Engine for Souq Commerce
//!
//! This crate keeps a client's local data mirror consistent with the remote
//! authority over an unreliable, intermittently connected network link.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Engine Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    SyncEngine (owner task)                       │  │
//! │  │                                                                  │  │
//! │  │  Spawned as a Tokio task; exclusively owns the transport         │  │
//! │  │  session, the outbound queue, and the writable sync state.       │  │
//! │  │  All mutation is serialized through its command mailbox.         │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ OutboundQueue  │  │   Transport    │  │  Dispatcher            │    │
//! │  │                │  │                │  │                        │    │
//! │  │ FIFO buffer    │  │ WebSocket with │  │ Typed pub/sub fan-out  │    │
//! │  │ while offline, │  │ auto-reconnect │  │ to decoupled           │    │
//! │  │ drained on     │  │ & capped       │  │ consumers, isolated    │    │
//! │  │ reconnect      │  │ backoff        │  │ per subscriber         │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  COLLABORATOR SURFACE (via SyncHandle):                                │
//! │  • send(kind, entity, id, payload) - publish a local change            │
//! │  • on_update(key, callback)        - subscribe to inbound changes      │
//! │  • sync_state()                    - connectivity/freshness snapshot   │
//! │  • connect()/disconnect()          - explicit lifecycle                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Sync configuration (client identity, endpoint, backoff)
//! - [`dispatcher`] - Typed event bus with per-subscriber isolation
//! - [`engine`] - The `SyncEngine` task and its `SyncHandle`
//! - [`error`] - Sync error taxonomy
//! - [`queue`] - The outbound FIFO queue
//! - [`state`] - Observable `SyncState` snapshot
//! - [`transport`] - WebSocket transport behind a `Connector` seam
//!
//! ## Usage
//!
//! ```rust,ignore
//! use souq_sync::{EventKey, MessageKind, SyncConfig, SyncEngine, SyncEvent};
//!
//! // Explicitly constructed and injected - no global singleton.
//! let handle = SyncEngine::spawn(SyncConfig::load_or_default(None));
//!
//! // Consume inbound product updates.
//! let subscription = handle.on_update(
//!     EventKey::entity("product", MessageKind::Update),
//!     |event| {
//!         if let SyncEvent::Change(msg) = event {
//!             println!("product {} changed", msg.entity_id);
//!         }
//!     },
//! );
//!
//! // Bring the link up and publish a change.
//! handle.connect("wss://sync.example.com/live", "bearer-token").await?;
//! handle
//!     .send(MessageKind::Update, "product", "prod-042", payload)
//!     .await?;
//!
//! // Render a status indicator.
//! let state = handle.sync_state().await;
//! println!("online: {}, pending: {}", state.is_online, state.pending_changes);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod queue;
pub mod state;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ClientConfig, SyncConfig, SyncSettings};
pub use dispatcher::{Dispatcher, Subscription, SyncEvent};
pub use engine::{SyncEngine, SyncHandle};
pub use error::{SyncError, SyncResult};
pub use state::{ConnectionQuality, ConnectionState, SyncState};
pub use transport::{Connector, Session, WsConnector};

// Wire-level types from the core crate, for convenience.
pub use souq_core::{ControlKind, EventKey, Message, MessageKind};
