//! # Sync Message Envelope
//!
//! The immutable value object describing one change (or control request)
//! flowing between a client and the remote authority.
//!
//! ## Wire Format (JSON, one message per frame)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Message Frame                                   │
//! │                                                                         │
//! │  {                                                                      │
//! │    "id":        "1719849600123-f3a91c02",   unique, for dedup/corr.    │
//! │    "type":      "UPDATE",                   UPDATE|CREATE|DELETE|      │
//! │                                             SYNC_REQUEST               │
//! │    "entity":    "product",                  opaque collection tag      │
//! │    "entityId":  "prod-042",                 record within collection   │
//! │    "data":      { ... },                    opaque delta/snapshot      │
//! │    "timestamp": 1719849600123,              creation time (epoch ms)   │
//! │    "userId":    "user-7",                   authoring actor            │
//! │    "companyId": "tenant-3"                  authoring tenant           │
//! │  }                                                                      │
//! │                                                                         │
//! │  The encoding must round-trip ALL fields losslessly - the remote       │
//! │  authority echoes frames back verbatim to other clients.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity & Ordering
//! `id` is unique within a process lifetime (creation timestamp plus a
//! random suffix). `timestamp` is non-decreasing for messages created by a
//! single producer in causal order; ordering is enforced by enqueue order,
//! never by wall-clock correction.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

// =============================================================================
// Message Kind
// =============================================================================

/// The kind of change (or control request) a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum MessageKind {
    /// An existing record changed.
    Update,

    /// A new record was created.
    Create,

    /// A record was removed.
    Delete,

    /// Control message: request (or acknowledge) a synchronization pass.
    /// Also carries the bearer credential right after a session opens.
    SyncRequest,
}

impl MessageKind {
    /// Returns the wire spelling of this kind (for logging and event keys).
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Update => "UPDATE",
            MessageKind::Create => "CREATE",
            MessageKind::Delete => "DELETE",
            MessageKind::SyncRequest => "SYNC_REQUEST",
        }
    }

    /// Returns true for the entity-change kinds (everything except control).
    pub fn is_change(&self) -> bool {
        !matches!(self, MessageKind::SyncRequest)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Message
// =============================================================================

/// One synchronized change: create/update/delete of a record, or a
/// `SyncRequest` control message.
///
/// Messages are immutable once constructed; consumers only ever receive
/// read-only views. The payload is opaque to the sync layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Message {
    /// Process-unique identifier: creation timestamp + random suffix.
    /// Used for idempotency/dedup on the remote and for correlation.
    pub id: String,

    /// What happened.
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Domain collection tag (e.g. "product", "invoice"). Opaque here.
    #[serde(rename = "entity")]
    pub entity_type: String,

    /// Identifier of the affected record within `entity_type`.
    #[serde(rename = "entityId")]
    pub entity_id: String,

    /// The business-object delta or full snapshot. Never interpreted.
    #[serde(rename = "data")]
    #[ts(type = "any")]
    pub payload: Value,

    /// Logical creation time, epoch milliseconds.
    #[ts(type = "number")]
    pub timestamp: i64,

    /// Authoring actor, for server-side authorization and loop suppression
    /// (a client must not re-apply its own echoed change).
    #[serde(rename = "userId")]
    pub origin_id: String,

    /// Authoring tenant.
    #[serde(rename = "companyId")]
    pub tenant_id: String,
}

impl Message {
    /// Creates a message stamped with a fresh id and the current time.
    pub fn new(
        kind: MessageKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
        origin_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        let timestamp = now_millis();
        Message {
            id: generate_id(timestamp),
            kind,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
            timestamp,
            origin_id: origin_id.into(),
            tenant_id: tenant_id.into(),
        }
    }

    /// Creates the identity control message sent right after a session
    /// opens: a `SyncRequest` carrying the bearer credential as payload
    /// (application-layer auth, not a transport header).
    pub fn auth_request(
        token: &str,
        origin_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Message::new(
            MessageKind::SyncRequest,
            "auth",
            "authenticate",
            serde_json::json!({ "token": token }),
            origin_id,
            tenant_id,
        )
    }

    /// Serializes to a single JSON wire frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a wire frame back into a message.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Builds a process-unique message id: `<timestamp>-<random suffix>`.
fn generate_id(timestamp: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", timestamp, &suffix[..8])
}

// =============================================================================
// Tests
// =============================================================================
