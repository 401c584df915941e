//! # Event Keys
//!
//! Typed subscription keys for the dispatcher's publish/subscribe fan-out.
//!
//! A subscriber registers under one key and receives only the traffic
//! routed there. Entity keys map onto the composite wire convention
//! `{entity}_{KIND}` (e.g. `product_UPDATE`); control keys carry engine
//! lifecycle notifications; the wildcard key observes every inbound change.

use crate::message::{Message, MessageKind};

// =============================================================================
// Control Kind
// =============================================================================

/// Engine lifecycle notifications delivered through the same bus as
/// entity changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// The reconnection budget was exhausted; sync is unavailable until
    /// `connect()` is called again.
    ConnectionFailed,

    /// The remote acknowledged the initial sync request.
    SyncComplete,

    /// A locally produced message was queued while offline.
    MessageQueued,
}

impl ControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::ConnectionFailed => "CONNECTION_FAILED",
            ControlKind::SyncComplete => "SYNC_COMPLETE",
            ControlKind::MessageQueued => "MESSAGE_QUEUED",
        }
    }
}

// =============================================================================
// Event Key
// =============================================================================

/// A subscription key on the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// Changes to one collection of one kind, e.g. product updates.
    Entity {
        entity_type: String,
        kind: MessageKind,
    },

    /// An engine lifecycle notification.
    Control(ControlKind),

    /// Every inbound change, regardless of collection or kind.
    /// For cross-cutting listeners (audit hooks, cache invalidation).
    Wildcard,
}

impl EventKey {
    /// Key for changes of `kind` to the `entity_type` collection.
    pub fn entity(entity_type: impl Into<String>, kind: MessageKind) -> Self {
        EventKey::Entity {
            entity_type: entity_type.into(),
            kind,
        }
    }

    /// The entity key an inbound message fans out under.
    pub fn for_message(message: &Message) -> Self {
        EventKey::Entity {
            entity_type: message.entity_type.clone(),
            kind: message.kind,
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKey::Entity { entity_type, kind } => {
                write!(f, "{}_{}", entity_type, kind.as_str())
            }
            EventKey::Control(kind) => f.write_str(kind.as_str()),
            EventKey::Wildcard => f.write_str("*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_key_spelling() {
        let key = EventKey::entity("product", MessageKind::Update);
        assert_eq!(key.to_string(), "product_UPDATE");
        assert_eq!(EventKey::Wildcard.to_string(), "*");
        assert_eq!(
            EventKey::Control(ControlKind::ConnectionFailed).to_string(),
            "CONNECTION_FAILED"
        );
    }

    #[test]
    fn test_for_message_matches_subscription_key() {
        let msg = Message::new(
            MessageKind::Delete,
            "invoice",
            "inv-9",
            serde_json::Value::Null,
            "user-1",
            "tenant-1",
        );
        assert_eq!(
            EventKey::for_message(&msg),
            EventKey::entity("invoice", MessageKind::Delete)
        );
    }
}
