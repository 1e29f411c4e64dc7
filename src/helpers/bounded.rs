//! Bounded deque for stream event history
//!
//! Fixed-capacity deque that evicts the oldest item when full (FIFO). Push
//! hands the evicted item back so callers can tell when history was truncated.

use std::collections::VecDeque;

/// A bounded deque with FIFO eviction policy
#[derive(Clone, Debug)]
pub struct BoundedDeque<T> {
    cap: usize,
    buf: VecDeque<T>,
}

impl<T> BoundedDeque<T> {
    /// Create a new bounded deque with the specified capacity
    ///
    /// # Arguments
    /// * `cap` - Maximum number of items to store. If 0, every push is evicted immediately.
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            buf: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    /// Push a new value, returning the item evicted to make room
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.cap == 0 {
            return Some(value);
        }
        let evicted = if self.buf.len() == self.cap {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(value);
        evicted
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.buf.iter()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Remove and yield every item, oldest first
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.buf.drain(..)
    }

    /// Most recent item
    pub fn last(&self) -> Option<&T> {
        self.buf.back()
    }

    /// Newest `n` items, oldest first
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &T> {
        self.buf.iter().skip(self.buf.len().saturating_sub(n))
    }
}

impl<T> Default for BoundedDeque<T> {
    fn default() -> Self {
        Self::new(crate::constants::STREAM_EVENTS_CAPACITY)
    }
}
