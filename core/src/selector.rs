//! # Transport Selector Table
//!
//! One slot per category holding the active strategy and a generation
//! counter. This is the structure kernel-side probes consult before every
//! event, exposed to them as a two-entry array of `u32` keyed by category.
//!
//! ## Slot Layout
//!
//! Each slot is a single 64-bit word so that strategy and generation change
//! in one indivisible store:
//!
//! ```text
//!  63                  32 31                   0
//! ┌──────────────────────┬──────────────────────┐
//! │      generation      │   strategy (ABI u32) │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! A reader can therefore never pair a new strategy with a stale generation.
//!
//! ## Access
//!
//! - Reads are a single atomic load: wait-free, any number of readers.
//! - Writes are crate-private and reach the outside world only through the
//!   switch controller, which is attached at most once per hub.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::{Category, StrategyId, TransportError, TransportResult, CATEGORY_COUNT};

const STRATEGY_MASK: u64 = 0xffff_ffff;
const GENERATION_SHIFT: u32 = 32;

/// A consistent view of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    /// Active strategy
    pub strategy: StrategyId,
    /// Number of writes this slot has seen (wrapping)
    pub generation: u32,
}

impl SlotSnapshot {
    const fn pack(self) -> u64 {
        ((self.generation as u64) << GENERATION_SHIFT) | self.strategy.abi() as u64
    }

    fn unpack(word: u64) -> Self {
        let value = (word & STRATEGY_MASK) as u32;
        let strategy = match StrategyId::from_abi(value) {
            Some(strategy) => strategy,
            None => {
                // Only `pack` writes slots.
                debug_assert!(false, "corrupt selector slot value {}", value);
                StrategyId::Legacy
            },
        };
        Self {
            strategy,
            generation: (word >> GENERATION_SHIFT) as u32,
        }
    }
}

/// One category's slot
#[derive(Debug)]
struct SelectorSlot {
    word: AtomicU64,
}

/// The per-category transport selector
#[derive(Debug)]
pub struct SelectorTable {
    slots: [SelectorSlot; CATEGORY_COUNT],
}

impl SelectorTable {
    /// Create a table with the given starting strategies, generation 0
    pub fn new(initial: [StrategyId; CATEGORY_COUNT]) -> Self {
        Self {
            slots: initial.map(|strategy| SelectorSlot {
                word: AtomicU64::new(
                    SlotSnapshot {
                        strategy,
                        generation: 0,
                    }
                    .pack(),
                ),
            }),
        }
    }

    /// Read a category's slot
    #[inline]
    pub fn read(&self, category: Category) -> SlotSnapshot {
        SlotSnapshot::unpack(self.slots[category.index()].word.load(Ordering::SeqCst))
    }

    /// Read a slot by its raw selector key, as kernel-side code addresses it
    pub fn read_key(&self, key: u32) -> TransportResult<SlotSnapshot> {
        match Category::from_key(key) {
            Some(category) => Ok(self.read(category)),
            None => {
                log::error!("[SELECTOR] Read of undefined category key {}", key);
                Err(TransportError::UnknownCategory(key))
            },
        }
    }

    /// Active strategy of a category
    #[inline]
    pub fn strategy(&self, category: Category) -> StrategyId {
        self.read(category).strategy
    }

    /// Has the slot been written since `generation` was observed?
    #[inline]
    pub fn changed_since(&self, category: Category, generation: u32) -> bool {
        self.read(category).generation != generation
    }

    /// Kernel-facing view: strategy ABI value per category key
    pub fn abi_snapshot(&self) -> [u32; CATEGORY_COUNT] {
        Category::ALL.map(|category| self.strategy(category).abi())
    }

    /// Point a category at `strategy` and bump its generation.
    ///
    /// Single writer: only the switch controller calls this.
    pub(crate) fn write(&self, category: Category, strategy: StrategyId) -> SlotSnapshot {
        let slot = &self.slots[category.index()];
        let current = SlotSnapshot::unpack(slot.word.load(Ordering::Acquire));
        let next = SlotSnapshot {
            strategy,
            generation: current.generation.wrapping_add(1),
        };
        slot.word.store(next.pack(), Ordering::SeqCst);

        log::debug!(
            "[SELECTOR] {} -> {} (generation {})",
            category,
            strategy,
            next.generation
        );
        next
    }
}
