//! # Kernel Detection
//!
//! Parses kernel release strings into comparable versions. With `std`, reads
//! the running host's release from `/proc`.
//!
//! Ubuntu kernels report a patched release through `uname`; the upstream
//! version they are based on lives in `/proc/version_signature`, which is
//! therefore preferred when present.

use core::fmt;

use crate::{HalError, HalResult};

/// Path of the Ubuntu upstream version signature
pub const VERSION_SIGNATURE_PATH: &str = "/proc/version_signature";

/// Path of the kernel release (same value as `uname -r`)
pub const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

/// A kernel version as `major.minor.patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Patch level (sublevel)
    pub patch: u32,
}

impl KernelVersion {
    /// Create a version
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Encode like the kernel's `KERNEL_VERSION(a, b, c)` macro.
    ///
    /// Minor and patch saturate at 255, as the kernel does for long-lived
    /// stable series.
    pub const fn code(&self) -> u32 {
        let minor = if self.minor > 255 { 255 } else { self.minor };
        let patch = if self.patch > 255 { 255 } else { self.patch };
        (self.major << 16) | (minor << 8) | patch
    }

    /// Parse a release such as `5.15.0-91-generic`, `6.1.0+` or `4.19`.
    ///
    /// A missing patch level reads as 0.
    pub fn parse(release: &str) -> HalResult<Self> {
        let release = release.trim();
        let numeric = release
            .split(|c: char| c == '-' || c == '+' || c == '~' || c == ' ')
            .next()
            .unwrap_or("");

        let mut parts = numeric.splitn(4, '.');
        let major = parts.next().and_then(leading_number);
        let minor = parts.next().and_then(leading_number);
        let patch = parts.next().map(leading_number);

        match (major, minor, patch) {
            (Some(major), Some(minor), None) => Ok(Self::new(major, minor, 0)),
            (Some(major), Some(minor), Some(Some(patch))) => Ok(Self::new(major, minor, patch)),
            _ => Err(HalError::InvalidKernelRelease),
        }
    }

    /// Parse a `/proc/version_signature` line, e.g.
    /// `Ubuntu 5.4.0-42.46-generic 5.4.44`. The last field is the upstream
    /// version.
    pub fn parse_signature(signature: &str) -> HalResult<Self> {
        let fields: alloc::vec::Vec<&str> = signature.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(HalError::InvalidKernelRelease);
        }
        Self::parse(fields[2])
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Digits at the start of a version component (`0_rc1` reads as 0)
fn leading_number(component: &str) -> Option<u32> {
    let end = component
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(component.len());
    component[..end].parse().ok()
}

/// Detect the running kernel's version
#[cfg(feature = "std")]
pub fn host_kernel_version() -> HalResult<KernelVersion> {
    if let Ok(signature) = std::fs::read_to_string(VERSION_SIGNATURE_PATH) {
        match KernelVersion::parse_signature(&signature) {
            Ok(version) => return Ok(version),
            Err(_) => log::debug!(
                "[KERNEL] Ignoring malformed {}: {:?}",
                VERSION_SIGNATURE_PATH,
                signature.trim()
            ),
        }
    }

    let release = std::fs::read_to_string(OSRELEASE_PATH)
        .map_err(|_| HalError::KernelReleaseUnavailable)?;
    KernelVersion::parse(&release)
}
