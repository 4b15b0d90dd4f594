//! # Per-CPU Rings (legacy transport)
//!
//! Mirrors the perf event array: every CPU writes into its own fixed-size
//! ring and the reader visits the rings in turn. A full ring loses the
//! event even if other CPUs have room, as perf buffers do.
//!
//! Order is preserved per CPU, not across CPUs.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::ring::RingBuffer;
use super::EventRing;

/// One bounded ring per CPU
#[derive(Debug)]
pub struct PerCpuRings<T> {
    rings: Vec<Mutex<RingBuffer<T>>>,
    /// Next ring the reader looks at
    cursor: AtomicUsize,
    per_cpu_capacity: usize,
}

impl<T> PerCpuRings<T> {
    /// Create `cpu_count` rings of `per_cpu_capacity` events each
    pub fn new(cpu_count: usize, per_cpu_capacity: usize) -> Self {
        let cpu_count = cpu_count.max(1);
        Self {
            rings: (0..cpu_count)
                .map(|_| Mutex::new(RingBuffer::new(per_cpu_capacity)))
                .collect(),
            cursor: AtomicUsize::new(0),
            per_cpu_capacity,
        }
    }

    /// Number of CPU rings
    pub fn cpu_count(&self) -> usize {
        self.rings.len()
    }

    /// Events queued on one CPU's ring
    pub fn cpu_len(&self, cpu: usize) -> usize {
        self.rings[cpu % self.rings.len()].lock().len()
    }
}

impl<T: Send> EventRing<T> for PerCpuRings<T> {
    fn push(&self, cpu: usize, event: T) -> Result<(), T> {
        self.rings[cpu % self.rings.len()].lock().push(event)
    }

    fn pop(&self) -> Option<T> {
        let count = self.rings.len();
        let start = self.cursor.load(Ordering::Relaxed);

        for offset in 0..count {
            let cpu = (start + offset) % count;
            let mut ring = self.rings[cpu].lock();
            if ring.is_empty() {
                continue;
            }
            let event = ring.pop();
            drop(ring);
            self.cursor.store((cpu + 1) % count, Ordering::Relaxed);
            return event;
        }
        None
    }

    fn len(&self) -> usize {
        self.rings.iter().map(|ring| ring.lock().len()).sum()
    }

    fn capacity(&self) -> usize {
        self.per_cpu_capacity * self.rings.len()
    }
}
