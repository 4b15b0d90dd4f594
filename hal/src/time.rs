//! # Time
//!
//! Monotonic time sources and deadline arithmetic for bounded waits.
//!
//! Every wait in the transport layer is expressed against a [`Clock`], never
//! against wall time. Hosts use [`MonotonicClock`]; tests and simulations
//! drive a [`ManualClock`] so that grace periods and timeouts are
//! deterministic.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Constants
// =============================================================================

/// Nanoseconds per second
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds per millisecond
pub const NS_PER_MS: u64 = 1_000_000;

/// Nanoseconds per microsecond
pub const NS_PER_US: u64 = 1_000;

// =============================================================================
// Clock Sources
// =============================================================================

/// A monotonic nanosecond time source
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary, fixed origin. Never decreases.
    fn now_ns(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }
}

/// Host monotonic clock, anchored at construction
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl MonotonicClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock starting at `start_ns`
    pub const fn new(start_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, delta_ns: u64) {
        self.now.fetch_add(delta_ns, Ordering::AcqRel);
    }

    /// Jump to an absolute time. Earlier values are ignored.
    pub fn set(&self, now_ns: u64) {
        self.now.fetch_max(now_ns, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

// =============================================================================
// Deadlines
// =============================================================================

/// A start instant plus a timeout, both in clock nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start_ns: u64,
    expires_ns: u64,
}

impl Deadline {
    /// Deadline `timeout_ns` after the clock's current time
    pub fn after(clock: &dyn Clock, timeout_ns: u64) -> Self {
        Self::starting_at(clock.now_ns(), timeout_ns)
    }

    /// Deadline `timeout_ns` after `start_ns`
    pub const fn starting_at(start_ns: u64, timeout_ns: u64) -> Self {
        Self {
            start_ns,
            expires_ns: start_ns.saturating_add(timeout_ns),
        }
    }

    /// When the deadline started
    pub const fn start_ns(&self) -> u64 {
        self.start_ns
    }

    /// When the deadline expires
    pub const fn expires_ns(&self) -> u64 {
        self.expires_ns
    }

    /// Has the deadline passed at `now_ns`?
    pub const fn has_expired(&self, now_ns: u64) -> bool {
        now_ns >= self.expires_ns
    }

    /// Time left at `now_ns` (zero once expired)
    pub const fn remaining(&self, now_ns: u64) -> u64 {
        self.expires_ns.saturating_sub(now_ns)
    }

    /// Time since start at `now_ns`
    pub const fn elapsed(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.start_ns)
    }
}

// =============================================================================
// Waiting
// =============================================================================

/// Back off for one iteration of a polling loop
#[inline]
pub fn relax() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "std")] {
            std::thread::yield_now();
        } else {
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_monotonic() {
        let clock = ManualClock::new(100);
        clock.advance(50);
        assert_eq!(clock.now_ns(), 150);

        clock.set(120);
        assert_eq!(clock.now_ns(), 150);

        clock.set(1_000);
        assert_eq!(clock.now_ns(), 1_000);
    }

    #[test]
    fn test_deadline_arithmetic() {
        let clock = ManualClock::new(10 * NS_PER_MS);
        let deadline = Deadline::after(&clock, 5 * NS_PER_MS);

        assert!(!deadline.has_expired(clock.now_ns()));
        assert_eq!(deadline.remaining(clock.now_ns()), 5 * NS_PER_MS);

        clock.advance(5 * NS_PER_MS);
        assert!(deadline.has_expired(clock.now_ns()));
        assert_eq!(deadline.remaining(clock.now_ns()), 0);
        assert_eq!(deadline.elapsed(clock.now_ns()), 5 * NS_PER_MS);
    }

    #[test]
    fn test_deadline_saturates() {
        let deadline = Deadline::starting_at(u64::MAX - 1, 10);
        assert_eq!(deadline.expires_ns(), u64::MAX);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(clock.now_ns() > a);
    }
}
