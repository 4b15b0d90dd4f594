//! # Capability Prober
//!
//! Decides, once at startup, which strategies each category may use.
//!
//! | Strategy | Kernel support needed | Minimum kernel |
//! |----------|-----------------------|----------------|
//! | Legacy   | `bpf_perf_event_output` into a perf event array | 4.4 |
//! | Modern   | `BPF_MAP_TYPE_RINGBUF` | 5.8 |

use warden_hal::KernelVersion;

use crate::config::TransportConfig;
use crate::{Category, StrategyId, TransportError, TransportResult, CATEGORY_COUNT};

/// Oldest kernel with perf event array output
pub const LEGACY_MIN_KERNEL: KernelVersion = KernelVersion::new(4, 4, 0);

/// Oldest kernel with the BPF ring buffer
pub const MODERN_MIN_KERNEL: KernelVersion = KernelVersion::new(5, 8, 0);

bitflags::bitflags! {
    /// A set of strategies
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StrategySet: u32 {
        /// Per-CPU perf buffers
        const LEGACY = 1 << 0;
        /// Shared ring buffer
        const MODERN = 1 << 1;
    }
}

impl StrategySet {
    /// The set holding only `strategy`
    pub const fn of(strategy: StrategyId) -> Self {
        match strategy {
            StrategyId::Legacy => Self::LEGACY,
            StrategyId::Modern => Self::MODERN,
        }
    }

    /// Does the set contain `strategy`?
    pub fn supports(self, strategy: StrategyId) -> bool {
        self.contains(Self::of(strategy))
    }

    /// Strategies a kernel version can carry
    pub fn for_kernel(version: KernelVersion) -> Self {
        let mut set = Self::empty();
        if version >= LEGACY_MIN_KERNEL {
            set |= Self::LEGACY;
        }
        if version >= MODERN_MIN_KERNEL {
            set |= Self::MODERN;
        }
        set
    }
}

/// Supported strategies per category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityMap {
    sets: [StrategySet; CATEGORY_COUNT],
}

impl CapabilityMap {
    /// Every category supports `set`
    pub const fn uniform(set: StrategySet) -> Self {
        Self {
            sets: [set; CATEGORY_COUNT],
        }
    }

    /// Replace one category's set
    pub fn with(mut self, category: Category, set: StrategySet) -> Self {
        self.sets[category.index()] = set;
        self
    }

    /// Strategies supported for `category`
    pub fn supported(&self, category: Category) -> StrategySet {
        self.sets[category.index()]
    }

    /// Is `strategy` usable for `category`?
    pub fn supports(&self, category: Category, strategy: StrategyId) -> bool {
        self.supported(category).supports(strategy)
    }

    /// Reject a strategy the category cannot use
    pub fn check(&self, category: Category, strategy: StrategyId) -> TransportResult<()> {
        if self.supports(category, strategy) {
            Ok(())
        } else {
            Err(TransportError::UnsupportedStrategy { category, strategy })
        }
    }

    /// Pick each category's startup strategy: the configured override if
    /// supported, else the preferred strategy if supported, else whatever is.
    pub fn initial_strategies(
        &self,
        config: &TransportConfig,
    ) -> TransportResult<[StrategyId; CATEGORY_COUNT]> {
        let mut chosen = [config.preferred_strategy; CATEGORY_COUNT];

        for category in Category::ALL {
            let set = self.supported(category);

            if let Some(forced) = config.initial_strategy[category.index()] {
                if set.supports(forced) {
                    chosen[category.index()] = forced;
                    continue;
                }
                log::warn!(
                    "[PROBE] {} cannot start on {}, kernel supports {:?}",
                    category,
                    forced,
                    set
                );
            }

            let preferred = config.preferred_strategy;
            chosen[category.index()] = if set.supports(preferred) {
                preferred
            } else if set.supports(preferred.other()) {
                preferred.other()
            } else {
                return Err(TransportError::NoSupportedStrategy(category));
            };
        }

        Ok(chosen)
    }
}

/// Source of the capability map
pub trait CapabilityProber {
    /// Determine supported strategies
    fn probe(&self) -> TransportResult<CapabilityMap>;
}

/// A fixed capability map
#[derive(Debug, Clone, Copy)]
pub struct StaticProber(pub CapabilityMap);

impl CapabilityProber for StaticProber {
    fn probe(&self) -> TransportResult<CapabilityMap> {
        Ok(self.0)
    }
}

/// Derives capabilities from the kernel version
#[derive(Debug, Clone, Copy)]
pub struct KernelProber {
    version: Option<KernelVersion>,
}

impl KernelProber {
    /// Probe a known kernel version
    pub const fn for_version(version: KernelVersion) -> Self {
        Self {
            version: Some(version),
        }
    }

    /// Probe the running host
    #[cfg(feature = "std")]
    pub const fn host() -> Self {
        Self { version: None }
    }
}

impl CapabilityProber for KernelProber {
    fn probe(&self) -> TransportResult<CapabilityMap> {
        let version = match self.version {
            Some(version) => version,
            None => host_version()?,
        };

        let set = StrategySet::for_kernel(version);
        log::info!("[PROBE] Kernel {} supports {:?}", version, set);
        Ok(CapabilityMap::uniform(set))
    }
}

#[cfg(feature = "std")]
fn host_version() -> TransportResult<KernelVersion> {
    Ok(warden_hal::host_kernel_version()?)
}

#[cfg(not(feature = "std"))]
fn host_version() -> TransportResult<KernelVersion> {
    Err(TransportError::Platform(
        warden_hal::HalError::KernelReleaseUnavailable,
    ))
}
