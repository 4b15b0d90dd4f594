//! # Channels
//!
//! A channel is one transport instance for one (category, strategy) pair:
//! bounded storage plus the bookkeeping the switch controller needs to
//! prove that nothing is still on its way in.
//!
//! ## In-flight Gate
//!
//! Every enqueue is bracketed by the channel's in-flight counter:
//!
//! ```text
//! producer                         controller
//! ────────                         ──────────
//! in_flight += 1                   slot := new strategy
//! if sealed { in_flight -= 1 }     sealed := true
//! push(event)                      wait until in_flight == 0
//! in_flight -= 1                            && pending == 0
//! ```
//!
//! All four accesses are sequentially consistent, so once the controller has
//! sealed the channel and then observed `in_flight == 0`, every later
//! enqueue attempt sees the seal and backs off. The channel contents at that
//! point are final.
//!
//! ## Kinds
//!
//! - [`percpu::PerCpuRings`]: legacy perf-buffer style, one ring per CPU
//! - [`shared::SharedRing`]: modern ring-buffer style, one shared ring

pub mod percpu;
mod ring;
pub mod shared;

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use spin::Once;

use crate::config::TransportConfig;
use crate::{Category, StrategyId};

pub use percpu::PerCpuRings;
pub use shared::SharedRing;

// =============================================================================
// Storage
// =============================================================================

/// Bounded event storage behind a channel
pub trait EventRing<T>: Send + Sync {
    /// Store an event written on `cpu`, handing it back when there is no room
    fn push(&self, cpu: usize, event: T) -> Result<(), T>;

    /// Take the next event
    fn pop(&self) -> Option<T>;

    /// Events currently stored
    fn len(&self) -> usize;

    /// Maximum number of events stored
    fn capacity(&self) -> usize;

    /// Is the storage empty?
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Channel State
// =============================================================================

/// Lifecycle of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Selected for its category, accepting events
    Active   = 0,
    /// Sealed by a switch; may still hold events
    Inactive = 1,
    /// Sealed and confirmed drained; may be recycled
    Retired  = 2,
}

impl ChannelState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Active,
            1 => ChannelState::Inactive,
            _ => ChannelState::Retired,
        }
    }
}

/// Why a channel turned an event away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// No room left
    Full,
    /// Channel sealed by a switch
    Inactive,
}

/// Channel statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    /// Events accepted
    pub enqueued: u64,
    /// Events handed to the reader
    pub dequeued: u64,
    /// Events lost to a full channel
    pub rejected_full: u64,
    /// Enqueue attempts turned away by the seal
    pub rejected_inactive: u64,
    /// Events waiting to be read
    pub pending: usize,
    /// Enqueues currently in progress
    pub in_flight: usize,
    /// Storage capacity
    pub capacity: usize,
    /// Lifecycle state
    pub state: ChannelState,
}

// =============================================================================
// Channel
// =============================================================================

/// One transport instance for a (category, strategy) pair
pub struct Channel<T> {
    category: Category,
    strategy: StrategyId,
    ring: Box<dyn EventRing<T>>,
    state: AtomicU8,
    in_flight: AtomicUsize,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    rejected_full: AtomicU64,
    rejected_inactive: AtomicU64,
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("category", &self.category)
            .field("strategy", &self.strategy)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl<T> Channel<T> {
    /// Wrap storage as an active channel
    pub fn new(category: Category, strategy: StrategyId, ring: Box<dyn EventRing<T>>) -> Self {
        Self {
            category,
            strategy,
            ring,
            state: AtomicU8::new(ChannelState::Active as u8),
            in_flight: AtomicUsize::new(0),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            rejected_full: AtomicU64::new(0),
            rejected_inactive: AtomicU64::new(0),
        }
    }

    /// Build the storage kind matching `strategy`, sized from `config`
    pub fn for_strategy(category: Category, strategy: StrategyId, config: &TransportConfig) -> Self
    where
        T: Send + 'static,
    {
        let ring: Box<dyn EventRing<T>> = match strategy {
            StrategyId::Legacy => Box::new(PerCpuRings::new(
                config.cpu_count,
                config.legacy_ring_capacity,
            )),
            StrategyId::Modern => Box::new(SharedRing::new(config.modern_ring_capacity)),
        };
        Self::new(category, strategy, ring)
    }

    /// Category this channel carries
    pub fn category(&self) -> Category {
        self.category
    }

    /// Strategy this channel implements
    pub fn strategy(&self) -> StrategyId {
        self.strategy
    }

    /// Lifecycle state
    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Enter the in-flight gate. The returned reservation holds the gate
    /// open until it is committed or dropped.
    pub fn reserve(&self) -> Result<ChannelReservation<'_, T>, Rejected> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.state.load(Ordering::SeqCst) != ChannelState::Active as u8 {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.rejected_inactive.fetch_add(1, Ordering::Relaxed);
            return Err(Rejected::Inactive);
        }
        Ok(ChannelReservation { channel: self })
    }

    /// Reserve and commit in one step
    pub fn enqueue(&self, cpu: usize, event: T) -> Result<(), Rejected> {
        self.reserve()?.commit(cpu, event)
    }

    /// Take the next event.
    ///
    /// Reading belongs to the category's [`Consumer`](crate::consumer::Consumer)
    /// alone, so this is not reachable through the hub:
    ///
    /// ```compile_fail
    /// # use warden_core::channel::Channel;
    /// fn steal(channel: &Channel<u32>) -> Option<u32> {
    ///     channel.dequeue()
    /// }
    /// ```
    pub(crate) fn dequeue(&self) -> Option<T> {
        let event = self.ring.pop();
        if event.is_some() {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        event
    }

    /// Events waiting to be read
    pub fn pending_count(&self) -> usize {
        self.ring.len()
    }

    /// Enqueues currently inside the gate
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Storage capacity
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Seal the channel: every later enqueue is rejected
    pub fn mark_inactive(&self) {
        let _ = self.state.compare_exchange(
            ChannelState::Active as u8,
            ChannelState::Inactive as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// No event queued and no enqueue in flight.
    ///
    /// Only final once the channel is sealed.
    pub fn is_drained(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0 && self.ring.is_empty()
    }

    /// Put a sealed channel back into service. Fails if events remain.
    ///
    /// Producers still bouncing off the seal may hold the gate counter up
    /// for a moment; they cannot store anything, so only the storage is
    /// checked.
    pub(crate) fn reactivate(&self) -> bool {
        if self.state() == ChannelState::Active {
            return true;
        }
        if !self.ring.is_empty() {
            return false;
        }
        self.state
            .store(ChannelState::Active as u8, Ordering::SeqCst);
        true
    }

    /// Mark a sealed, drained channel as retired
    pub(crate) fn retire(&self) {
        self.state
            .store(ChannelState::Retired as u8, Ordering::SeqCst);
    }

    /// Statistics snapshot
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            rejected_full: self.rejected_full.load(Ordering::Relaxed),
            rejected_inactive: self.rejected_inactive.load(Ordering::Relaxed),
            pending: self.pending_count(),
            in_flight: self.in_flight(),
            capacity: self.capacity(),
            state: self.state(),
        }
    }
}

/// An open slot in a channel's in-flight gate
pub struct ChannelReservation<'a, T> {
    channel: &'a Channel<T>,
}

impl<T> fmt::Debug for ChannelReservation<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReservation")
            .field("category", &self.channel.category)
            .field("strategy", &self.channel.strategy)
            .finish()
    }
}

impl<'a, T> ChannelReservation<'a, T> {
    /// Channel the reservation belongs to
    pub fn channel(&self) -> &'a Channel<T> {
        self.channel
    }

    /// Store the event and leave the gate
    pub fn commit(self, cpu: usize, event: T) -> Result<(), Rejected> {
        let channel = self.channel;
        match channel.ring.push(cpu, event) {
            Ok(()) => {
                channel.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(_lost) => {
                channel.rejected_full.fetch_add(1, Ordering::Relaxed);
                log::trace!(
                    "[CHANNEL] {} {} full, event lost on cpu {}",
                    channel.category,
                    channel.strategy,
                    cpu
                );
                Err(Rejected::Full)
            },
        }
        // `self` drops here and leaves the gate after the push.
    }
}

impl<T> Drop for ChannelReservation<'_, T> {
    fn drop(&mut self) {
        self.channel.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Channel Pair
// =============================================================================

const NOT_DRAINING: u32 = u32::MAX;

/// Legacy and modern channels of one category.
///
/// Channels are created on first use and live as long as the pair, so
/// references handed to producers and the consumer stay valid across
/// switches.
pub struct ChannelPair<T> {
    category: Category,
    legacy: Once<Channel<T>>,
    modern: Once<Channel<T>>,
    /// Strategy being drained by an unfinished switch
    draining: AtomicU32,
}

impl<T> fmt::Debug for ChannelPair<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPair")
            .field("category", &self.category)
            .field("legacy", &self.legacy.get())
            .field("modern", &self.modern.get())
            .field("draining", &self.draining_from())
            .finish()
    }
}

impl<T> ChannelPair<T> {
    /// Create a pair with no channels yet
    pub const fn new(category: Category) -> Self {
        Self {
            category,
            legacy: Once::new(),
            modern: Once::new(),
            draining: AtomicU32::new(NOT_DRAINING),
        }
    }

    /// Category of the pair
    pub fn category(&self) -> Category {
        self.category
    }

    fn cell(&self, strategy: StrategyId) -> &Once<Channel<T>> {
        match strategy {
            StrategyId::Legacy => &self.legacy,
            StrategyId::Modern => &self.modern,
        }
    }

    /// The channel for `strategy`, if it was ever created
    pub fn get(&self, strategy: StrategyId) -> Option<&Channel<T>> {
        self.cell(strategy).get()
    }

    /// The channel for `strategy`, creating it on first use
    pub(crate) fn get_or_create(&self, strategy: StrategyId, config: &TransportConfig) -> &Channel<T>
    where
        T: Send + 'static,
    {
        self.cell(strategy).call_once(|| {
            log::debug!("[CHANNEL] Creating {} channel for {}", strategy, self.category);
            Channel::for_strategy(self.category, strategy, config)
        })
    }

    /// Strategy whose channel an unfinished switch is draining
    pub fn draining_from(&self) -> Option<StrategyId> {
        match self.draining.load(Ordering::SeqCst) {
            NOT_DRAINING => None,
            value => StrategyId::from_abi(value),
        }
    }

    pub(crate) fn set_draining(&self, strategy: Option<StrategyId>) {
        let value = strategy.map_or(NOT_DRAINING, StrategyId::abi);
        self.draining.store(value, Ordering::SeqCst);
    }
}
