//! # Sync State
//!
//! The observable connectivity/freshness snapshot exposed to collaborators
//! (status indicators, pending-change badges).
//!
//! The engine task is the single writer; readers always get a value copy,
//! never a live reference, so a snapshot cannot change mid-read.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Connection State
// =============================================================================

/// State machine position of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; no attempt in flight.
    Disconnected,

    /// Attempting to open a session (initial or retry).
    Connecting,

    /// Session open and ready.
    Connected,

    /// Retry budget exhausted. Terminal until `connect()` is called again.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Connection Quality
// =============================================================================

/// Heuristic link quality derived from recent transport stability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionQuality {
    /// Fresh, unbroken connection established on the first attempt.
    Excellent,

    /// Connected, but only after failed attempts in this cycle.
    Good,

    /// Flapping: the previous session died inside the flap window, or the
    /// current attempt just errored.
    Poor,

    /// Not connected at all.
    Offline,
}

impl ConnectionQuality {
    /// Quality to report for a newly established session.
    ///
    /// `failed_attempts` counts the connect failures in the current cycle
    /// before this success; `last_session` is how long the previous session
    /// lived, if there was one.
    pub(crate) fn on_established(
        failed_attempts: u32,
        last_session: Option<Duration>,
        flap_window: Duration,
    ) -> Self {
        if last_session.is_some_and(|lived| lived < flap_window) {
            ConnectionQuality::Poor
        } else if failed_attempts > 0 {
            ConnectionQuality::Good
        } else {
            ConnectionQuality::Excellent
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionQuality::Excellent => write!(f, "excellent"),
            ConnectionQuality::Good => write!(f, "good"),
            ConnectionQuality::Poor => write!(f, "poor"),
            ConnectionQuality::Offline => write!(f, "offline"),
        }
    }
}

// =============================================================================
// Sync State Snapshot
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone)]
pub struct SyncState {
    /// Current connection-manager state.
    pub connection_state: ConnectionState,

    /// Whether a session is currently open.
    pub is_online: bool,

    /// Last successful sync activity (epoch milliseconds), 0 if never.
    pub last_sync_time: i64,

    /// Number of locally produced messages awaiting delivery.
    pub pending_changes: usize,

    /// Heuristic link quality.
    pub connection_quality: ConnectionQuality,
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState {
            connection_state: ConnectionState::Disconnected,
            is_online: false,
            last_sync_time: 0,
            pending_changes: 0,
            connection_quality: ConnectionQuality::Offline,
        }
    }
}
