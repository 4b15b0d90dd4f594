//! Switch history
//!
//! A bounded log of finished switch requests, oldest first.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::{Category, StrategyId};

/// Records kept before the oldest is dropped
pub const MAX_HISTORY: usize = 64;

/// How a request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Old channel drained and retired
    Completed,
    /// Drain did not finish before the timeout; the old channel is leaked
    TimedOut,
    /// A leaked channel was retired by `reclaim`
    Reclaimed,
    /// Target not supported for the category
    Rejected,
    /// Replaced by a newer request before its flip
    Superseded,
}

/// One history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchRecord {
    /// Category of the request
    pub category: Category,
    /// Strategy selected when the request started
    pub from: StrategyId,
    /// Requested strategy
    pub to: StrategyId,
    /// Slot generation after the request (unchanged if it never flipped)
    pub generation: u32,
    /// How the request ended
    pub outcome: RecordOutcome,
    /// Clock time the request started
    pub started_ns: u64,
    /// Clock time the outcome was recorded
    pub finished_ns: u64,
}

impl SwitchRecord {
    /// Time between start and outcome
    pub fn duration_ns(&self) -> u64 {
        self.finished_ns.saturating_sub(self.started_ns)
    }
}

#[derive(Debug)]
pub(crate) struct SwitchHistory {
    records: VecDeque<SwitchRecord>,
}

impl SwitchHistory {
    pub(crate) fn new() -> Self {
        Self {
            records: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    pub(crate) fn push(&mut self, record: SwitchRecord) {
        if self.records.len() == MAX_HISTORY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub(crate) fn to_vec(&self) -> Vec<SwitchRecord> {
        self.records.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(generation: u32) -> SwitchRecord {
        SwitchRecord {
            category: Category::SyscallMonitor,
            from: StrategyId::Legacy,
            to: StrategyId::Modern,
            generation,
            outcome: RecordOutcome::Completed,
            started_ns: 10,
            finished_ns: 25,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = SwitchHistory::new();
        for generation in 0..(MAX_HISTORY as u32 + 3) {
            history.push(record(generation));
        }

        let records = history.to_vec();
        assert_eq!(records.len(), MAX_HISTORY);
        assert_eq!(records[0].generation, 3);
        assert_eq!(records[MAX_HISTORY - 1].generation, MAX_HISTORY as u32 + 2);
        assert_eq!(records[0].duration_ns(), 15);
    }
}
