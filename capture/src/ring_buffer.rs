//! Fixed-capacity ring buffer for per-channel sample history.
//!
//! Each device channel keeps a bounded sliding window of recent entries;
//! pushing beyond capacity evicts the oldest. Indexed access exists so the
//! alignment code can binary-search timestamped entries.

use std::collections::vec_deque::Iter;
use std::collections::VecDeque;

/// A fixed-capacity ring buffer that evicts oldest elements when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a new ring buffer with the specified capacity.
    ///
    /// # Panics
    /// Panics if capacity is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be greater than 0");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes an element to the back of the buffer, evicting the oldest
    /// element first when at capacity.
    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Returns the number of elements in the buffer.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the buffer contains no elements.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the maximum capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Element at position `index`, oldest first.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Returns an iterator over the elements in order (oldest to newest).
    pub fn iter(&self) -> Iter<'_, T> {
        self.items.iter()
    }

    /// Clears all elements from the buffer.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Returns a reference to the most recent element, if any.
    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Returns a reference to the oldest element, if any.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Collects elements into a Vec, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: PartialEq> PartialEq for RingBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.capacity == other.capacity && self.items == other.items
    }
}
