//! Bounded priority queue of pending preload requests
//!
//! Requests are kept sorted by priority (highest first). Requests of equal
//! priority keep their insertion order, so the queue behaves as FIFO within a
//! priority level. When the queue grows past its capacity the lowest-priority
//! tail is dropped.

use std::collections::VecDeque;

use crate::clock::Timestamp;

/// A queued request to load `payload`
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadRequest<P> {
    /// Opaque description of what to load
    pub payload: P,

    /// Higher values are loaded first
    pub priority: f32,

    /// When the request entered the queue
    pub enqueued_at: Timestamp,
}

/// Bounded, priority-ordered request queue
///
/// # Example
///
/// ```
/// use texslot_scheduler::PreloadQueue;
///
/// let mut queue = PreloadQueue::new(2);
/// queue.push("low", 0.1, 0);
/// queue.push("high", 0.9, 0);
/// let dropped = queue.push("mid", 0.5, 0);
///
/// assert_eq!(dropped, 1);
/// assert_eq!(queue.pop().map(|r| r.payload), Some("high"));
/// assert_eq!(queue.pop().map(|r| r.payload), Some("mid"));
/// assert!(queue.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct PreloadQueue<P> {
    entries: VecDeque<PreloadRequest<P>>,
    capacity: usize,
}

impl<P> PreloadQueue<P> {
    /// Create an empty queue holding at most `capacity` requests
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Insert a request, returning how many requests were dropped to stay
    /// within capacity
    ///
    /// The new request is placed after every queued request with the same or
    /// higher priority. A NaN priority sorts below every real priority. If the
    /// new request itself lands past the capacity it is the one dropped.
    pub fn push(&mut self, payload: P, priority: f32, enqueued_at: Timestamp) -> usize {
        let priority = if priority.is_nan() {
            f32::NEG_INFINITY
        } else {
            priority
        };

        let position = self.entries.partition_point(|entry| entry.priority >= priority);
        self.entries.insert(
            position,
            PreloadRequest {
                payload,
                priority,
                enqueued_at,
            },
        );

        let overflow = self.entries.len().saturating_sub(self.capacity);
        self.entries.truncate(self.capacity);
        overflow
    }

    /// Remove and return the highest-priority request
    pub fn pop(&mut self) -> Option<PreloadRequest<P>> {
        self.entries.pop_front()
    }

    /// Look at the highest-priority request without removing it
    pub fn peek(&self) -> Option<&PreloadRequest<P>> {
        self.entries.front()
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of queued requests
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard every queued request, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Iterate over queued requests in dequeue order
    pub fn iter(&self) -> impl Iterator<Item = &PreloadRequest<P>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        let mut queue = PreloadQueue::new(10);
        queue.push("thumbnail", 0.2, 0);
        queue.push("visible", 1.0, 1);
        queue.push("adjacent", 0.5, 2);

        assert_eq!(queue.pop().unwrap().payload, "visible");
        assert_eq!(queue.pop().unwrap().payload, "adjacent");
        assert_eq!(queue.pop().unwrap().payload, "thumbnail");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_same_priority() {
        let mut queue = PreloadQueue::new(10);
        queue.push(1, 0.5, 0);
        queue.push(2, 0.5, 1);
        queue.push(3, 0.5, 2);

        assert_eq!(queue.pop().unwrap().payload, 1);
        assert_eq!(queue.pop().unwrap().payload, 2);
        assert_eq!(queue.pop().unwrap().payload, 3);
    }

    #[test]
    fn test_mixed_priorities_keep_fifo_per_level() {
        let mut queue = PreloadQueue::new(10);
        queue.push("a-low", 0.1, 0);
        queue.push("a-high", 0.9, 1);
        queue.push("b-low", 0.1, 2);
        queue.push("b-high", 0.9, 3);

        let order: Vec<_> = queue.iter().map(|r| r.payload).collect();
        assert_eq!(order, vec!["a-high", "b-high", "a-low", "b-low"]);
    }

    #[test]
    fn test_overflow_keeps_highest_priorities() {
        let capacity = 5;
        let extra = 3;
        let mut queue = PreloadQueue::new(capacity);

        let mut dropped = 0;
        for i in 0..(capacity + extra) {
            dropped += queue.push(i, i as f32, i as u64);
        }

        assert_eq!(dropped, extra);
        assert_eq!(queue.len(), capacity);

        let kept: Vec<_> = queue.iter().map(|r| r.payload).collect();
        assert_eq!(kept, vec![7, 6, 5, 4, 3]);
    }

    #[test]
    fn test_overflow_drops_incoming_when_lowest() {
        let mut queue = PreloadQueue::new(2);
        queue.push("a", 0.9, 0);
        queue.push("b", 0.8, 0);

        assert_eq!(queue.push("c", 0.1, 0), 1);
        let kept: Vec<_> = queue.iter().map(|r| r.payload).collect();
        assert_eq!(kept, vec!["a", "b"]);
    }

    #[test]
    fn test_overflow_at_equal_priority_drops_newest() {
        let mut queue = PreloadQueue::new(2);
        queue.push("first", 0.5, 0);
        queue.push("second", 0.5, 1);

        assert_eq!(queue.push("third", 0.5, 2), 1);
        let kept: Vec<_> = queue.iter().map(|r| r.payload).collect();
        assert_eq!(kept, vec!["first", "second"]);
    }

    #[test]
    fn test_nan_priority_sorts_last() {
        let mut queue = PreloadQueue::new(10);
        queue.push("nan", f32::NAN, 0);
        queue.push("zero", 0.0, 1);

        assert_eq!(queue.pop().unwrap().payload, "zero");
        assert_eq!(queue.pop().unwrap().payload, "nan");
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let mut queue = PreloadQueue::new(0);
        assert_eq!(queue.push("a", 1.0, 0), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_peek_and_clear() {
        let mut queue = PreloadQueue::new(4);
        queue.push("a", 0.3, 7);
        queue.push("b", 0.6, 8);

        let head = queue.peek().unwrap();
        assert_eq!(head.payload, "b");
        assert_eq!(head.enqueued_at, 8);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 4);
    }
}
