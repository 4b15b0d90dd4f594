//! # Transport Configuration
//!
//! Sizing of the two channel kinds, switch timing and the startup strategy
//! preference. Loading values from files or flags is left to the agent.

use warden_hal::{NS_PER_MS, NS_PER_SEC};

use crate::{Category, StrategyId, TransportError, TransportResult, CATEGORY_COUNT};

/// Default events per legacy per-CPU ring
pub const DEFAULT_LEGACY_RING_CAPACITY: usize = 256;

/// Default events in the modern shared ring
pub const DEFAULT_MODERN_RING_CAPACITY: usize = 4096;

/// Default grace period after a flip
pub const DEFAULT_GRACE_PERIOD_NS: u64 = NS_PER_MS;

/// Default limit on how long a switch waits for the old channel to drain
pub const DEFAULT_DRAIN_TIMEOUT_NS: u64 = 5 * NS_PER_SEC;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Number of legacy per-CPU rings
    pub cpu_count: usize,
    /// Events per legacy per-CPU ring
    pub legacy_ring_capacity: usize,
    /// Events in the modern shared ring
    pub modern_ring_capacity: usize,
    /// Minimum time a switch waits after sealing the old channel
    pub grace_period_ns: u64,
    /// Time after the flip at which an undrained switch is declared failed
    pub drain_timeout_ns: u64,
    /// Strategy used at startup wherever the kernel supports it
    pub preferred_strategy: StrategyId,
    /// Per-category startup overrides
    pub initial_strategy: [Option<StrategyId>; CATEGORY_COUNT],
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            cpu_count: default_cpu_count(),
            legacy_ring_capacity: DEFAULT_LEGACY_RING_CAPACITY,
            modern_ring_capacity: DEFAULT_MODERN_RING_CAPACITY,
            grace_period_ns: DEFAULT_GRACE_PERIOD_NS,
            drain_timeout_ns: DEFAULT_DRAIN_TIMEOUT_NS,
            preferred_strategy: StrategyId::Modern,
            initial_strategy: [None; CATEGORY_COUNT],
        }
    }
}

impl TransportConfig {
    /// Set the number of legacy per-CPU rings
    pub fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    /// Set the per-CPU legacy ring capacity
    pub fn with_legacy_ring_capacity(mut self, capacity: usize) -> Self {
        self.legacy_ring_capacity = capacity;
        self
    }

    /// Set the modern ring capacity
    pub fn with_modern_ring_capacity(mut self, capacity: usize) -> Self {
        self.modern_ring_capacity = capacity;
        self
    }

    /// Set the post-flip grace period
    pub fn with_grace_period_ns(mut self, grace_ns: u64) -> Self {
        self.grace_period_ns = grace_ns;
        self
    }

    /// Set the drain timeout
    pub fn with_drain_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.drain_timeout_ns = timeout_ns;
        self
    }

    /// Set the startup preference
    pub fn with_preferred_strategy(mut self, strategy: StrategyId) -> Self {
        self.preferred_strategy = strategy;
        self
    }

    /// Force a category's startup strategy
    pub fn with_initial_strategy(mut self, category: Category, strategy: StrategyId) -> Self {
        self.initial_strategy[category.index()] = Some(strategy);
        self
    }

    /// Check the configuration for values the transport cannot run with
    pub fn validate(&self) -> TransportResult<()> {
        if self.cpu_count == 0 {
            return Err(TransportError::InvalidConfig("cpu_count must be at least 1"));
        }
        if self.legacy_ring_capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "legacy_ring_capacity must be at least 1",
            ));
        }
        if self.modern_ring_capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "modern_ring_capacity must be at least 1",
            ));
        }
        if self.drain_timeout_ns < self.grace_period_ns {
            return Err(TransportError::InvalidConfig(
                "drain_timeout_ns must not be shorter than grace_period_ns",
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
fn default_cpu_count() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

#[cfg(not(feature = "std"))]
fn default_cpu_count() -> usize {
    1
}
