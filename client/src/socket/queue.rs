//! Bounded offline message queue.

use std::collections::VecDeque;

use crate::messages::OutboundMessage;

/// FIFO of messages sent while offline.
///
/// Pushing onto a full queue evicts the oldest entry; it never blocks and
/// never fails.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    capacity: usize,
    messages: VecDeque<OutboundMessage>,
}

impl MessageQueue {
    /// Creates an empty queue. A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a message, returning the evicted oldest entry if the queue was full.
    pub fn push(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// Returns the oldest message.
    #[must_use]
    pub fn front(&self) -> Option<&OutboundMessage> {
        self.messages.front()
    }

    /// Removes and returns the oldest message.
    pub fn pop(&mut self) -> Option<OutboundMessage> {
        self.messages.pop_front()
    }

    /// Removes every message, oldest first.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        self.messages.drain(..).collect()
    }

    /// Iterates oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.messages.iter()
    }

    /// Returns the number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> OutboundMessage {
        OutboundMessage::new(format!("m{n}"))
    }

    #[test]
    fn test_push_within_capacity() {
        let mut queue = MessageQueue::new(3);
        assert!(queue.push(numbered(0)).is_none());
        assert!(queue.push(numbered(1)).is_none());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front().map(|m| m.action.as_str()), Some("m0"));
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut queue = MessageQueue::new(100);
        let mut evicted = 0;
        for n in 0..150 {
            if queue.push(numbered(n)).is_some() {
                evicted += 1;
            }
        }

        assert_eq!(evicted, 50);
        assert_eq!(queue.len(), 100);
        let actions: Vec<String> = queue.drain().into_iter().map(|m| m.action).collect();
        assert_eq!(actions.first().map(String::as_str), Some("m50"));
        assert_eq!(actions.last().map(String::as_str), Some("m149"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let mut queue = MessageQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(numbered(0));
        let evicted = queue.push(numbered(1));
        assert_eq!(evicted.map(|m| m.action), Some("m0".to_string()));
        assert_eq!(queue.pop().map(|m| m.action), Some("m1".to_string()));
    }
}
