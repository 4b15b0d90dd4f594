//! # Consumer
//!
//! The single reader of a category. It reads the channel the slot currently
//! selects and, once that is empty, the tail of the channel an unfinished
//! switch is draining. The tail check stops as soon as the switch retires
//! the old channel.
//!
//! Records read while a switch is draining are not globally ordered: order
//! holds per producer within each channel only. Sinks that need strict
//! order must wait for the category to be stable.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::hub::TransportHub;
use crate::{Category, StrategyId, TransportError, TransportResult};

/// One delivered event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<T> {
    /// Category the event belongs to
    pub category: Category,
    /// Strategy of the channel it was read from
    pub source: StrategyId,
    /// The event, untouched
    pub payload: T,
}

/// Destination of pumped records
pub trait RecordSink<T> {
    /// Take one record
    fn deliver(&mut self, record: Record<T>);
}

impl<T, F: FnMut(Record<T>)> RecordSink<T> for F {
    fn deliver(&mut self, record: Record<T>) {
        self(record)
    }
}

/// Reader handle of one category
#[derive(Debug)]
pub struct Consumer<T> {
    hub: Arc<TransportHub<T>>,
    category: Category,
    delivered: u64,
}

impl<T> Consumer<T> {
    /// Become the reader of `category`.
    ///
    /// Fails with `ConsumerAttached` while another reader is alive.
    pub fn attach(hub: Arc<TransportHub<T>>, category: Category) -> TransportResult<Self> {
        if !hub.claim_consumer(category) {
            return Err(TransportError::ConsumerAttached(category));
        }
        log::debug!("[CONSUMER] Attached to {}", category);
        Ok(Self {
            hub,
            category,
            delivered: 0,
        })
    }

    /// Category this consumer reads
    pub fn category(&self) -> Category {
        self.category
    }

    /// Records handed out so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Take the next record, if any
    pub fn poll(&mut self) -> Option<Record<T>> {
        let pair = self.hub.pair(self.category);
        let current = self.hub.table().strategy(self.category);

        let mut source = current;
        let mut payload = pair.get(current).and_then(|channel| channel.dequeue());

        if payload.is_none() {
            if let Some(previous) = pair.draining_from().filter(|&previous| previous != current) {
                source = previous;
                payload = pair.get(previous).and_then(|channel| channel.dequeue());
            }
        }

        let payload = payload?;
        self.delivered += 1;
        Some(Record {
            category: self.category,
            source,
            payload,
        })
    }

    /// Take up to `max` records
    pub fn poll_batch(&mut self, max: usize) -> Vec<Record<T>> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.poll() {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        batch
    }

    /// Feed up to `budget` records into `sink`, returning how many were fed
    pub fn pump<S: RecordSink<T> + ?Sized>(&mut self, sink: &mut S, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            let Some(record) = self.poll() else { break };
            sink.deliver(record);
            count += 1;
        }
        if count > 0 {
            log::trace!("[CONSUMER] {} pumped {} records", self.category, count);
        }
        count
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.hub.release_consumer(self.category);
    }
}
