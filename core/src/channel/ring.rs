//! Fixed-capacity FIFO storage shared by both channel kinds.
//!
//! The capacity is decided once, from the transport config, and the backing
//! deque is allocated up front so pushes never allocate.

use alloc::collections::VecDeque;

/// A bounded queue of owned events
#[derive(Debug)]
pub(crate) struct RingBuffer<T> {
    events: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, handing the event back when full
    pub(crate) fn push(&mut self, event: T) -> Result<(), T> {
        if self.is_full() {
            return Err(event);
        }
        self.events.push_back(event);
        Ok(())
    }

    /// Remove from the head
    pub(crate) fn pop(&mut self) -> Option<T> {
        self.events.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}
