//! # Sync Error Types
//!
//! Error types for the realtime sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection-    │  │  MalformedFrame         │ │
//! │  │  MissingClientId│  │    Failed       │  │  Serialization          │ │
//! │  │  InvalidUrl     │  │  Disconnected   │  │                         │ │
//! │  │  ConfigLoad/    │  │  Timeout        │  │                         │ │
//! │  │    SaveFailed   │  │  Tls, WebSocket │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │   Terminal      │  │               Internal                      │  │
//! │  │                 │  │                                             │  │
//! │  │  Connection-    │  │  Subscriber (panic, isolated)               │  │
//! │  │    Exhausted    │  │  Channel, ShuttingDown                      │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation Policy
//! Only `ConnectionExhausted` is allowed to reach the collaborator layer
//! (as the `Failed` state and the `ConnectionFailed` notification). Every
//! other kind is absorbed: transport errors feed the retry loop, malformed
//! frames are dropped and logged, subscriber panics are caught and logged.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing client ID (required for loop suppression and authorization).
    #[error("Client ID not configured. Run initial setup first.")]
    MissingClientId,

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish the transport session.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport session closed unexpectedly.
    #[error("Disconnected from sync endpoint")]
    Disconnected,

    /// Connection timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Inbound frame failed to parse. Recovered locally: the frame is
    /// dropped and the connection stays open.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Failed to serialize an outbound message.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Terminal Errors
    // =========================================================================
    /// The retry budget was exhausted with no successful connection.
    /// No further automatic attempts; `connect()` must be called again.
    #[error("Connection attempts exhausted after {attempts} failures")]
    ConnectionExhausted { attempts: u32 },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A registered subscriber callback panicked (caught and isolated).
    #[error("Subscriber panicked while handling {key}")]
    SubscriberPanicked { key: String },

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The engine task has stopped.
    #[error("Sync engine is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if this error is recoverable and the operation can be
    /// retried by the backoff loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::TlsError(_)
                | SyncError::WebSocketError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingClientId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error must surface to the collaborator layer
    /// instead of being absorbed into state changes and log entries.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::ConnectionExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(SyncError::Timeout(10).is_retryable());

        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::MalformedFrame("garbage".into()).is_retryable());
        assert!(!SyncError::ConnectionExhausted { attempts: 5 }.is_retryable());
    }

    #[test]
    fn test_only_exhaustion_is_terminal() {
        assert!(SyncError::ConnectionExhausted { attempts: 5 }.is_terminal());
        assert!(!SyncError::Disconnected.is_terminal());
        assert!(!SyncError::MalformedFrame("x".into()).is_terminal());
        assert!(!SyncError::SubscriberPanicked { key: "*".into() }.is_terminal());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::ConnectionExhausted { attempts: 5 };
        assert!(err.to_string().contains("5"));
        assert!(SyncError::InvalidUrl("not-a-url".into())
            .to_string()
            .contains("not-a-url"));
    }
}
