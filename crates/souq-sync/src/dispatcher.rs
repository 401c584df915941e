//! # Message Dispatcher
//!
//! Routing, not transport: a typed publish/subscribe bus that fans inbound
//! messages out to decoupled consumers.
//!
//! ## Fan-out Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Dispatcher Fan-out                               │
//! │                                                                         │
//! │   inbound Message { entity: "product", type: UPDATE }                   │
//! │                          │                                              │
//! │                          ▼                                              │
//! │        ┌─────────────────────────────────────┐                          │
//! │        │        subscriber registry          │                          │
//! │        │                                     │                          │
//! │        │  product_UPDATE ──► [cb1, cb2]      │   insertion order        │
//! │        │  invoice_CREATE ──► [cb3]           │                          │
//! │        │  *              ──► [cb4]           │   wildcard hook          │
//! │        │  CONNECTION_FAILED ─► [cb5]         │   control channel        │
//! │        └─────────────────────────────────────┘                          │
//! │                          │                                              │
//! │          cb1 ── cb2 ── cb4   (synchronous, one at a time)               │
//! │                                                                         │
//! │  ISOLATION: a panicking subscriber is caught and logged; delivery       │
//! │  to the remaining subscribers continues unaffected.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Registry mutations (subscribe/unsubscribe) are short atomic operations
//! behind a mutex and may be called from any thread. Callbacks run outside
//! the lock, so a subscriber may itself subscribe or unsubscribe.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use souq_core::{ControlKind, EventKey, Message};

// =============================================================================
// Sync Event
// =============================================================================

/// What a subscriber receives: an inbound change or an engine notification.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// An inbound entity change (create/update/delete).
    Change(Message),

    /// The remote acknowledged the initial sync request.
    SyncComplete { timestamp: i64 },

    /// A locally produced message was queued while offline.
    Queued(Message),

    /// The reconnection budget was exhausted; sync is unavailable until
    /// `connect()` is called again.
    ConnectionFailed,
}

// =============================================================================
// Subscriber Registry
// =============================================================================

type CallbackFn = dyn Fn(&SyncEvent) + Send + Sync;

struct Registry {
    next_id: u64,
    /// Insertion-ordered subscribers per key. Order is stable but carries
    /// no semantic guarantee for subscribers.
    channels: HashMap<EventKey, Vec<(u64, Arc<CallbackFn>)>>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            next_id: 0,
            channels: HashMap::new(),
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Typed event bus mapping [`EventKey`]s to ordered subscriber lists.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            registry: Arc::new(Mutex::new(Registry::new())),
        }
    }

    /// Registers a callback under `key`. The returned [`Subscription`] is
    /// the capability to deregister it; dropping the subscription without
    /// calling [`Subscription::unsubscribe`] leaves the callback active
    /// for the lifetime of the dispatcher.
    pub fn on_update(
        &self,
        key: EventKey,
        callback: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut registry = self.registry.lock().expect("subscriber registry poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .channels
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        debug!(key = %key, id, "subscriber registered");

        Subscription {
            registry: self.registry.clone(),
            key,
            id,
        }
    }

    /// Fans an inbound change out to its entity channel and the wildcard
    /// channel.
    pub fn fan_out(&self, message: &Message) {
        let event = SyncEvent::Change(message.clone());
        self.emit(&EventKey::for_message(message), &event);
        self.emit(&EventKey::Wildcard, &event);
    }

    /// Delivers an engine notification to its control channel.
    pub fn notify_control(&self, kind: ControlKind, event: SyncEvent) {
        self.emit(&EventKey::Control(kind), &event);
    }

    /// Synchronous delivery to every subscriber of `key`, isolated per
    /// subscriber: a panic is caught, logged, and delivery continues.
    fn emit(&self, key: &EventKey, event: &SyncEvent) {
        let callbacks: Vec<Arc<CallbackFn>> = {
            let registry = self.registry.lock().expect("subscriber registry poisoned");
            match registry.channels.get(key) {
                Some(subscribers) => subscribers.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(key = %key, "subscriber panicked; continuing fan-out");
            }
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, key: &EventKey) -> usize {
        self.registry
            .lock()
            .unwrap()
            .channels
            .get(key)
            .map_or(0, Vec::len)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Capability to deregister one subscriber.
pub struct Subscription {
    registry: Arc<Mutex<Registry>>,
    key: EventKey,
    id: u64,
}

impl Subscription {
    /// Removes the subscriber from the registry. Subsequent fan-outs no
    /// longer reach it.
    pub fn unsubscribe(self) {
        let mut registry = self.registry.lock().expect("subscriber registry poisoned");
        if let Some(subscribers) = registry.channels.get_mut(&self.key) {
            subscribers.retain(|(id, _)| *id != self.id);
            if subscribers.is_empty() {
                registry.channels.remove(&self.key);
            }
        }
        debug!(key = %self.key, id = self.id, "subscriber removed");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use souq_core::MessageKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn change(entity_type: &str, kind: MessageKind) -> Message {
        Message::new(
            kind,
            entity_type,
            "rec-1",
            serde_json::json!({ "v": 1 }),
            "user-9",
            "tenant-1",
        )
    }

    #[test]
    fn test_fan_out_reaches_entity_and_wildcard() {
        let dispatcher = Dispatcher::new();
        let entity_hits = Arc::new(AtomicUsize::new(0));
        let wildcard_hits = Arc::new(AtomicUsize::new(0));

        let hits = entity_hits.clone();
        let _entity = dispatcher.on_update(
            EventKey::entity("product", MessageKind::Update),
            move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            },
        );
        let hits = wildcard_hits.clone();
        let _wildcard = dispatcher.on_update(EventKey::Wildcard, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.fan_out(&change("product", MessageKind::Update));
        dispatcher.fan_out(&change("invoice", MessageKind::Create));

        // Entity subscriber saw only its channel; wildcard saw both.
        assert_eq!(entity_hits.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscribers_notified_in_insertion_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subscriptions = Vec::new();
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            subscriptions.push(dispatcher.on_update(EventKey::Wildcard, move |_| {
                order.lock().unwrap().push(tag);
            }));
        }

        dispatcher.fan_out(&change("product", MessageKind::Update));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_the_rest() {
        let dispatcher = Dispatcher::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let _bad = dispatcher.on_update(EventKey::Wildcard, |_| {
            panic!("subscriber bug");
        });
        let hits = delivered.clone();
        let _good = dispatcher.on_update(EventKey::Wildcard, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.fan_out(&change("product", MessageKind::Update));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let subscription = dispatcher.on_update(EventKey::Wildcard, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.fan_out(&change("product", MessageKind::Update));
        subscription.unsubscribe();
        dispatcher.fan_out(&change("product", MessageKind::Update));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.subscriber_count(&EventKey::Wildcard), 0);
    }

    #[test]
    fn test_control_channel_is_separate_from_changes() {
        let dispatcher = Dispatcher::new();
        let control_hits = Arc::new(AtomicUsize::new(0));

        let hits = control_hits.clone();
        let _sub = dispatcher.on_update(
            EventKey::Control(ControlKind::ConnectionFailed),
            move |event| {
                assert!(matches!(event, SyncEvent::ConnectionFailed));
                hits.fetch_add(1, Ordering::SeqCst);
            },
        );

        dispatcher.fan_out(&change("product", MessageKind::Update));
        assert_eq!(control_hits.load(Ordering::SeqCst), 0);

        dispatcher.notify_control(ControlKind::ConnectionFailed, SyncEvent::ConnectionFailed);
        assert_eq!(control_hits.load(Ordering::SeqCst), 1);
    }
}
