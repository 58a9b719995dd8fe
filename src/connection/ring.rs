//! FIFO buffer of completed async results

use super::Outcome;
use crate::ticket::TicketId;
use std::collections::VecDeque;
use tracing::debug;

/// Completed `(ticket, outcome)` entries in delivery order.
///
/// The logical capacity drives admission backpressure. Pushing past it
/// doubles the capacity rather than dropping an entry.
#[derive(Debug)]
pub struct ResultRing {
    entries: VecDeque<(TicketId, Outcome)>,
    capacity: usize,
}

impl ResultRing {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, id: TicketId, outcome: Outcome) {
        if self.is_full() {
            self.capacity *= 2;
            self.entries.reserve(self.capacity - self.entries.len());
            debug!(capacity = self.capacity, "Result ring grown");
        }
        self.entries.push_back((id, outcome));
    }

    /// Reshape to hold at least `min_capacity` entries, never fewer than
    /// currently buffered. Order is preserved.
    pub fn resize(&mut self, min_capacity: usize) {
        self.capacity = min_capacity.max(self.entries.len()).max(1);
        if self.capacity > self.entries.len() {
            self.entries.reserve(self.capacity - self.entries.len());
        }
    }

    /// Take every buffered entry, oldest first
    pub fn take_all(&mut self) -> Vec<(TicketId, Outcome)> {
        self.entries.drain(..).collect()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(entries: &[(TicketId, Outcome)]) -> Vec<u64> {
        entries.iter().map(|(id, _)| id.0).collect()
    }

    #[test]
    fn test_push_past_capacity_doubles() {
        let mut ring = ResultRing::with_capacity(2);
        for i in 1..=5 {
            ring.push(TicketId(i), Outcome::Removed);
        }
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ids(&ring.take_all()), vec![1, 2, 3, 4, 5]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_resize_never_drops_entries() {
        let mut ring = ResultRing::with_capacity(4);
        for i in 1..=4 {
            ring.push(TicketId(i), Outcome::NotFound);
        }
        ring.resize(2);
        assert_eq!(ring.capacity(), 4);
        assert!(ring.is_full());

        ring.resize(40);
        assert_eq!(ring.capacity(), 40);
        assert!(!ring.is_full());
        assert_eq!(ids(&ring.take_all()), vec![1, 2, 3, 4]);
    }
}
