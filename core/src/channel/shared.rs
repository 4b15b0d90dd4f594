//! # Shared Ring (modern transport)
//!
//! Mirrors the BPF ring buffer: one ring shared by all CPUs, so a burst on
//! one CPU can use the whole capacity and the reader sees a single stream.

use spin::Mutex;

use super::ring::RingBuffer;
use super::EventRing;

/// A single bounded ring written by every CPU
#[derive(Debug)]
pub struct SharedRing<T> {
    ring: Mutex<RingBuffer<T>>,
}

impl<T> SharedRing<T> {
    /// Create a ring holding up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(capacity)),
        }
    }
}

impl<T: Send> EventRing<T> for SharedRing<T> {
    fn push(&self, _cpu: usize, event: T) -> Result<(), T> {
        self.ring.lock().push(event)
    }

    fn pop(&self) -> Option<T> {
        self.ring.lock().pop()
    }

    fn len(&self) -> usize {
        self.ring.lock().len()
    }

    fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }
}
