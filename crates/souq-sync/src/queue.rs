//! # Outbound Queue
//!
//! FIFO buffer of locally produced messages not yet handed to the
//! transport. Appended while disconnected, drained in enqueue order on
//! reconnect. A message whose send the transport rejects goes back to the
//! front so the drain can resume without reordering.
//!
//! Queue contents are volatile: they do not survive a process restart.

use std::collections::VecDeque;

use tracing::warn;

use souq_core::Message;

/// Ordered buffer of unconfirmed outbound messages.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<Message>,

    /// Log a warning once the queue grows past this size.
    warn_threshold: usize,
}

impl OutboundQueue {
    pub fn new(warn_threshold: usize) -> Self {
        OutboundQueue {
            entries: VecDeque::new(),
            warn_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a message in enqueue order.
    pub fn push_back(&mut self, message: Message) {
        self.entries.push_back(message);
        if self.entries.len() == self.warn_threshold {
            warn!(
                queued = self.entries.len(),
                "outbound queue reached warn threshold while offline"
            );
        }
    }

    /// Puts a message whose send failed back at the front, preserving the
    /// original delivery order for the next drain.
    pub fn requeue_front(&mut self, message: Message) {
        self.entries.push_front(message);
    }

    /// Removes and returns the oldest queued message.
    pub fn pop_front(&mut self) -> Option<Message> {
        self.entries.pop_front()
    }

    /// Discards every queued message without delivery.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use souq_core::MessageKind;

    fn msg(entity_id: &str) -> Message {
        Message::new(
            MessageKind::Update,
            "product",
            entity_id,
            serde_json::Value::Null,
            "user-1",
            "tenant-1",
        )
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = OutboundQueue::new(100);
        queue.push_back(msg("a"));
        queue.push_back(msg("b"));
        queue.push_back(msg("c"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front().unwrap().entity_id, "a");
        assert_eq!(queue.pop_front().unwrap().entity_id, "b");
        assert_eq!(queue.pop_front().unwrap().entity_id, "c");
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn test_requeue_front_preserves_drain_order() {
        let mut queue = OutboundQueue::new(100);
        queue.push_back(msg("a"));
        queue.push_back(msg("b"));

        // "a" popped for sending, the transport rejects it.
        let failed = queue.pop_front().unwrap();
        queue.requeue_front(failed);

        assert_eq!(queue.pop_front().unwrap().entity_id, "a");
        assert_eq!(queue.pop_front().unwrap().entity_id, "b");
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut queue = OutboundQueue::new(100);
        queue.push_back(msg("a"));
        queue.push_back(msg("b"));
        queue.clear();
        assert!(queue.is_empty());
    }
}
