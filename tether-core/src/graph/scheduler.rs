//! Update Queue
//!
//! The queue holds consumers waiting to run and decides when they may run.
//!
//! # Algorithm
//!
//! 1. A notification enqueues every affected eager consumer. Enqueuing a
//!    consumer that is already pending is a no-op, so repeated writes inside
//!    a batch coalesce into one run.
//! 2. While a batch is open (`depth > 0`) or a flush is already draining the
//!    queue, nothing runs.
//! 3. Otherwise the queue is drained front to back: consumers run in the
//!    order they were first enqueued. Consumers enqueued by a running
//!    consumer land at the back and run in the same flush.

use std::collections::{HashMap, VecDeque};

use crate::reactive::ConsumerId;

/// Pending consumers plus the batch nesting depth.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    /// Run order. An entry is live only while its ticket matches `pending`;
    /// removed consumers are skipped when they reach the front.
    order: VecDeque<(ConsumerId, u64)>,

    /// Pending consumers and the ticket of their live entry in `order`.
    pending: HashMap<ConsumerId, u64>,

    next_ticket: u64,

    /// Current batch depth (> 0 means we're in a batch).
    depth: usize,

    /// Whether a flush is currently draining the queue.
    flushing: bool,
}

impl UpdateQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a consumer to the pending set.
    ///
    /// Returns `false` if it was already pending.
    pub fn enqueue(&mut self, consumer: ConsumerId) -> bool {
        if self.pending.contains_key(&consumer) {
            return false;
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.insert(consumer, ticket);
        self.order.push_back((consumer, ticket));
        true
    }

    /// Take the next consumer to run.
    pub fn pop_front(&mut self) -> Option<ConsumerId> {
        while let Some((consumer, ticket)) = self.order.pop_front() {
            if self.pending.get(&consumer) == Some(&ticket) {
                self.pending.remove(&consumer);
                return Some(consumer);
            }
        }
        None
    }

    /// Drop a consumer from the pending set.
    pub fn remove(&mut self, consumer: ConsumerId) -> bool {
        let removed = self.pending.remove(&consumer).is_some();
        if self.pending.is_empty() {
            self.order.clear();
        }
        removed
    }

    /// Whether a consumer is waiting to run.
    pub fn contains(&self, consumer: ConsumerId) -> bool {
        self.pending.contains_key(&consumer)
    }

    /// Number of pending consumers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Open a batch.
    pub fn pause(&mut self) {
        self.depth += 1;
    }

    /// Close a batch. Returns `true` when the outermost batch was closed.
    ///
    /// Closing with no open batch is ignored.
    pub fn resume(&mut self) -> bool {
        match self.depth {
            0 => false,
            depth => {
                self.depth = depth - 1;
                self.depth == 0
            }
        }
    }

    /// Current batch depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_batching(&self) -> bool {
        self.depth > 0
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub(crate) fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }

    /// Whether pending consumers may run right now.
    pub fn can_flush(&self) -> bool {
        self.depth == 0 && !self.flushing && !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_deduplicates_and_keeps_insertion_order() {
        let mut queue = UpdateQueue::new();
        let a = ConsumerId::new();
        let b = ConsumerId::new();

        assert!(queue.enqueue(b));
        assert!(queue.enqueue(a));
        assert!(!queue.enqueue(b));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop_front(), Some(b));
        assert_eq!(queue.pop_front(), Some(a));
        assert_eq!(queue.pop_front(), None);
    }

    #[test]
    fn nested_batches_release_at_outermost() {
        let mut queue = UpdateQueue::new();
        queue.enqueue(ConsumerId::new());

        queue.pause();
        queue.pause();
        assert!(!queue.can_flush());

        assert!(!queue.resume());
        assert!(queue.is_batching());
        assert!(queue.resume());
        assert!(queue.can_flush());

        // Unbalanced resume is ignored.
        assert!(!queue.resume());
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn flushing_blocks_nested_flush() {
        let mut queue = UpdateQueue::new();
        queue.enqueue(ConsumerId::new());
        queue.set_flushing(true);
        assert!(!queue.can_flush());
        queue.set_flushing(false);
        assert!(queue.can_flush());
    }

    #[test]
    fn removed_consumers_are_skipped() {
        let mut queue = UpdateQueue::new();
        let a = ConsumerId::new();
        let b = ConsumerId::new();
        queue.enqueue(a);
        queue.enqueue(b);

        assert!(queue.remove(a));
        assert!(!queue.contains(a));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_front(), Some(b));
        assert_eq!(queue.pop_front(), None);
    }

    #[test]
    fn requeued_consumer_moves_to_the_back() {
        let mut queue = UpdateQueue::new();
        let a = ConsumerId::new();
        let b = ConsumerId::new();
        queue.enqueue(a);
        queue.enqueue(b);

        queue.remove(a);
        assert!(queue.enqueue(a));
        assert_eq!(queue.pop_front(), Some(b));
        assert_eq!(queue.pop_front(), Some(a));
        assert!(queue.is_empty());
    }

    #[test]
    fn draining_a_large_queue_keeps_order() {
        let mut queue = UpdateQueue::new();
        let ids: Vec<_> = (0..50_000).map(|_| ConsumerId::new()).collect();
        for &id in &ids {
            queue.enqueue(id);
        }
        for &id in ids.iter().step_by(2) {
            queue.remove(id);
        }

        let drained: Vec<_> = std::iter::from_fn(|| queue.pop_front()).collect();
        let expected: Vec<_> = ids.iter().copied().skip(1).step_by(2).collect();
        assert_eq!(drained, expected);
    }
}
