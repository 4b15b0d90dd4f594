//! # Warden Transport Core
//!
//! Selection and switchover of kernel-to-agent event transports.
//!
//! Every monitored event category is carried by one of two transports: the
//! legacy per-CPU perf buffers or the single shared BPF ring buffer. This
//! crate decides which one each category uses and moves a category from one
//! to the other while producers keep emitting, without losing or duplicating
//! an event.
//!
//! ## Components
//!
//! - **Capability Prober** ([`probe`]): which transports the kernel supports
//! - **Selector Table** ([`selector`]): per-category active transport plus a
//!   generation counter, the only state shared with kernel-side code
//! - **Channels** ([`channel`]): one legacy and one modern channel per
//!   category, each with an in-flight gate used for quiescence
//! - **Producers** ([`producer`]): route each event through the selector
//! - **Switch Controller** ([`switch`]): flip, seal, drain, retire
//! - **Consumer** ([`consumer`]): single reader per category
//!
//! ## Switchover
//!
//! ```text
//!   Stable(old) ──request──▶ Flipping ──seal old──▶ Draining(old) ──drained──▶ Stable(new)
//!                                                        │
//!                                                        └──timeout──▶ Draining(old, stale)
//! ```
//!
//! Strict global event order holds only while a category is `Stable`.
//! During a switch, order is preserved per producer within each channel but
//! not across the two channels.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_core::{Category, StrategyId, TransportConfig};
//! use warden_core::hub::TransportHub;
//! use warden_core::probe::KernelProber;
//! use warden_core::switch::{SwitchController, SwitchRequest};
//! use warden_core::consumer::Consumer;
//!
//! let hub = TransportHub::<Vec<u8>>::probe(TransportConfig::default(), &KernelProber::host())?;
//! let mut controller = SwitchController::attach(hub.clone(), clock)?;
//! let producer = hub.producer(0);
//! let mut consumer = Consumer::attach(hub.clone(), Category::SyscallMonitor)?;
//!
//! producer.emit(Category::SyscallMonitor, event)?;
//! controller.switch(SwitchRequest::new(Category::SyscallMonitor, StrategyId::Modern))?;
//! while let Some(record) = consumer.poll() { /* ... */ }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod channel;
pub mod config;
pub mod consumer;
pub mod hub;
pub mod probe;
pub mod producer;
pub mod selector;
pub mod switch;

#[cfg(test)]
mod scenarios;

use core::fmt;

use static_assertions::const_assert_eq;
use warden_hal::HalError;

pub use config::TransportConfig;

/// Number of event categories (entries in the kernel selector map)
pub const CATEGORY_COUNT: usize = 2;

// =============================================================================
// Categories
// =============================================================================

/// A class of monitored kernel events sharing one transport decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Category {
    /// Syscall activity monitor
    SyscallMonitor    = 0,
    /// Monitor of the event transport itself (lost samples, buffer usage)
    PerfBufferMonitor = 1,
}

impl Category {
    /// All categories, in key order
    pub const ALL: [Category; CATEGORY_COUNT] = [Category::SyscallMonitor, Category::PerfBufferMonitor];

    /// Key of this category in the kernel selector map
    pub const fn key(self) -> u32 {
        self as u32
    }

    /// Index into per-category arrays
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Look up a category by its selector map key
    pub const fn from_key(key: u32) -> Option<Self> {
        match key {
            0 => Some(Category::SyscallMonitor),
            1 => Some(Category::PerfBufferMonitor),
            _ => None,
        }
    }

    /// Stable name
    pub const fn name(self) -> &'static str {
        match self {
            Category::SyscallMonitor => "syscall-monitor",
            Category::PerfBufferMonitor => "perf-buffer-monitor",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// A kernel-to-userspace transport implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StrategyId {
    /// Per-CPU perf event buffers
    Legacy = 0,
    /// Single shared BPF ring buffer
    Modern = 1,
}

impl StrategyId {
    /// Both strategies
    pub const ALL: [StrategyId; 2] = [StrategyId::Legacy, StrategyId::Modern];

    /// Value stored in the kernel selector map
    pub const fn abi(self) -> u32 {
        self as u32
    }

    /// Decode a selector map value
    pub const fn from_abi(value: u32) -> Option<Self> {
        match value {
            0 => Some(StrategyId::Legacy),
            1 => Some(StrategyId::Modern),
            _ => None,
        }
    }

    /// The other strategy
    pub const fn other(self) -> Self {
        match self {
            StrategyId::Legacy => StrategyId::Modern,
            StrategyId::Modern => StrategyId::Legacy,
        }
    }

    /// Stable name
    pub const fn name(self) -> &'static str {
        match self {
            StrategyId::Legacy => "perf-buffer",
            StrategyId::Modern => "ring-buffer",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// The kernel side reads both keys and values as u32.
const_assert_eq!(core::mem::size_of::<Category>(), 4);
const_assert_eq!(core::mem::size_of::<StrategyId>(), 4);
const_assert_eq!(Category::ALL.len(), CATEGORY_COUNT);

// =============================================================================
// Errors
// =============================================================================

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The kernel does not support the requested strategy for this category
    UnsupportedStrategy {
        /// Category of the request
        category: Category,
        /// Requested strategy
        strategy: StrategyId,
    },
    /// The kernel supports neither strategy for this category
    NoSupportedStrategy(Category),
    /// The old channel did not drain in time; the slot already moved
    DrainTimeout {
        /// Category left in `Draining`
        category: Category,
        /// Strategy of the leaked channel
        stale: StrategyId,
        /// Events still queued in the leaked channel
        pending: usize,
        /// Enqueues still in flight on the leaked channel
        in_flight: usize,
    },
    /// The target channel rejected the event
    ChannelFull {
        /// Category of the event
        category: Category,
        /// Strategy of the rejecting channel
        strategy: StrategyId,
    },
    /// Selector key outside the category table
    UnknownCategory(u32),
    /// Selector value outside the strategy set
    UnknownStrategy(u32),
    /// A previous switch of this category has not finished draining
    SwitchPending(Category),
    /// Reclaim requested for a category that is not draining
    NotDraining(Category),
    /// A newer request for the same category replaced this one before its flip
    Superseded {
        /// Category of the request
        category: Category,
        /// Target the request asked for
        target: StrategyId,
    },
    /// The category already has a consumer
    ConsumerAttached(Category),
    /// The hub already has a switch controller
    ControllerAttached,
    /// Configuration rejected
    InvalidConfig(&'static str),
    /// Platform error
    Platform(HalError),
    /// Internal invariant violated
    Internal(&'static str),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedStrategy { category, strategy } => {
                write!(f, "{} is not supported for {}", strategy, category)
            },
            Self::NoSupportedStrategy(category) => {
                write!(f, "No supported transport for {}", category)
            },
            Self::DrainTimeout {
                category,
                stale,
                pending,
                in_flight,
            } => write!(
                f,
                "Drain of {} {} channel timed out ({} pending, {} in flight)",
                category, stale, pending, in_flight
            ),
            Self::ChannelFull { category, strategy } => {
                write!(f, "{} {} channel is full", category, strategy)
            },
            Self::UnknownCategory(key) => write!(f, "Unknown category key {}", key),
            Self::UnknownStrategy(value) => write!(f, "Unknown strategy value {}", value),
            Self::SwitchPending(category) => {
                write!(f, "Switch of {} is still draining", category)
            },
            Self::NotDraining(category) => write!(f, "{} is not draining", category),
            Self::Superseded { category, target } => {
                write!(f, "Switch of {} to {} was superseded", category, target)
            },
            Self::ConsumerAttached(category) => {
                write!(f, "{} already has a consumer", category)
            },
            Self::ControllerAttached => write!(f, "Switch controller already attached"),
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::Platform(err) => write!(f, "Platform error: {}", err),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<HalError> for TransportError {
    fn from(err: HalError) -> Self {
        Self::Platform(err)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransportError {}
