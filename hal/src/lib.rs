//! # Warden Platform Abstraction Layer
//!
//! The small set of platform services the transport core depends on, kept
//! behind narrow interfaces so the core stays `no_std` + `alloc`.
//!
//! ## Components
//!
//! - **Time**: monotonic clocks, deadlines and the relax primitive used by
//!   bounded waits
//! - **Kernel**: kernel release parsing and host kernel detection
//!
//! ## Features
//!
//! - `std` (default): host monotonic clock, thread yielding and `/proc`
//!   based kernel detection. Without it only the portable pieces remain.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod kernel;
pub mod time;

pub use kernel::KernelVersion;
#[cfg(feature = "std")]
pub use kernel::host_kernel_version;
#[cfg(feature = "std")]
pub use time::MonotonicClock;
pub use time::{relax, Clock, Deadline, ManualClock, NS_PER_MS, NS_PER_SEC, NS_PER_US};

/// Result type for platform operations
pub type HalResult<T> = Result<T, HalError>;

/// Platform error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Kernel release string could not be parsed
    InvalidKernelRelease,
    /// No source of kernel release information was readable
    KernelReleaseUnavailable,
}

impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidKernelRelease => write!(f, "Invalid kernel release string"),
            Self::KernelReleaseUnavailable => write!(f, "Kernel release unavailable"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}
