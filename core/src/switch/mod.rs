//! # Switch Controller
//!
//! Moves a category from one strategy to the other while producers keep
//! emitting.
//!
//! ## Protocol
//!
//! 1. Reject unsupported targets and targets equal to the current strategy.
//! 2. Make the target channel available (create or recycle it).
//! 3. **Flip**: write the target into the selector slot. Every later slot
//!    read observes the target and a new generation.
//! 4. **Seal**: mark the old channel inactive. Producers that read the old
//!    slot value but have not entered its gate yet get turned away and
//!    re-route.
//! 5. **Drain**: wait out the grace period, then until the old channel has
//!    no enqueue in flight and nothing queued. The consumer empties it.
//! 6. **Retire**: the old channel goes back to the pool and the category is
//!    `Stable(target)`.
//!
//! A drain that outlives the drain timeout leaves the category in
//! `Draining` with the old channel flagged stale. Nothing is discarded; an
//! operator calls [`SwitchController::reclaim`] once the channel is empty.
//!
//! There is at most one controller per hub and it is the only writer of the
//! selector table.

mod history;

pub use history::{RecordOutcome, SwitchRecord, MAX_HISTORY};

use alloc::sync::Arc;
use alloc::vec::Vec;

use warden_hal::{relax, Clock, Deadline};

use crate::channel::Channel;
use crate::hub::TransportHub;
use crate::{Category, StrategyId, TransportError, TransportResult, CATEGORY_COUNT};

use history::SwitchHistory;

/// Consecutive drain checks on an unchanged clock before `switch` gives up
pub const STALLED_CLOCK_SPINS: usize = 10_000;

// =============================================================================
// Requests and Results
// =============================================================================

/// A desired transition of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchRequest {
    /// Category to move
    pub category: Category,
    /// Strategy to move it to
    pub target: StrategyId,
}

impl SwitchRequest {
    /// Create a request
    pub const fn new(category: Category, target: StrategyId) -> Self {
        Self { category, target }
    }
}

/// Identifier of a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Raw value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Switch state of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    /// Selected strategy is settled
    Stable(StrategyId),
    /// Slot write in progress
    Flipping {
        /// Strategy being left
        from: StrategyId,
        /// Strategy being entered
        to: StrategyId,
    },
    /// Slot moved; old channel not yet confirmed empty
    Draining {
        /// Strategy whose channel is draining
        from: StrategyId,
        /// Strategy now selected
        to: StrategyId,
        /// Drain timed out and the old channel is leaked
        stale: bool,
    },
}

/// Successful end of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The category already used the target
    Unchanged(StrategyId),
    /// The category moved and the old channel was retired
    Completed {
        /// Previous strategy
        from: StrategyId,
        /// New strategy
        to: StrategyId,
        /// Slot generation written by the flip
        generation: u32,
        /// Time from flip to retirement
        elapsed_ns: u64,
    },
}

/// Result of one protocol step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchProgress {
    /// Nothing left to do
    Complete(SwitchOutcome),
    /// Waiting for the old channel
    Draining {
        /// Events still queued in the old channel
        pending: usize,
        /// Enqueues still in flight on the old channel
        in_flight: usize,
        /// Time left before the drain times out
        remaining_ns: u64,
    },
}

/// Result of a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchReport {
    /// Id handed out by [`SwitchController::submit`]
    pub id: RequestId,
    /// The request
    pub request: SwitchRequest,
    /// How it ended
    pub result: TransportResult<SwitchOutcome>,
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Drain {
    from: StrategyId,
    to: StrategyId,
    generation: u32,
    grace: Deadline,
    timeout: Deadline,
    stale: bool,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Stable(StrategyId),
    Flipping { from: StrategyId, to: StrategyId },
    Draining(Drain),
}

/// The single writer of a hub's selector table
pub struct SwitchController<T> {
    hub: Arc<TransportHub<T>>,
    clock: Arc<dyn Clock>,
    phases: [Phase; CATEGORY_COUNT],
    queued: [Option<(RequestId, SwitchRequest)>; CATEGORY_COUNT],
    superseded: Vec<SwitchReport>,
    next_id: u64,
    history: SwitchHistory,
}

impl<T> core::fmt::Debug for SwitchController<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SwitchController")
            .field("phases", &self.phases)
            .field("queued", &self.queued)
            .field("history", &self.history)
            .finish()
    }
}

impl<T: Send + 'static> SwitchController<T> {
    /// Take control of `hub`'s selector table.
    ///
    /// Fails with `ControllerAttached` while another controller is alive.
    pub fn attach(hub: Arc<TransportHub<T>>, clock: Arc<dyn Clock>) -> TransportResult<Self> {
        if !hub.claim_controller() {
            return Err(TransportError::ControllerAttached);
        }

        // A switch left unfinished by a previous controller stays flagged
        // until someone reclaims its channel.
        let now = clock.now_ns();
        let phases = Category::ALL.map(|category| {
            let slot = hub.table().read(category);
            match hub.pair(category).draining_from() {
                Some(from) if from != slot.strategy => {
                    log::warn!(
                        "[SWITCH] {} inherited unfinished drain of {}, marked stale",
                        category,
                        from
                    );
                    Phase::Draining(Drain {
                        from,
                        to: slot.strategy,
                        generation: slot.generation,
                        grace: Deadline::starting_at(now, 0),
                        timeout: Deadline::starting_at(now, 0),
                        stale: true,
                    })
                },
                _ => Phase::Stable(slot.strategy),
            }
        });
        Ok(Self {
            hub,
            clock,
            phases,
            queued: [None; CATEGORY_COUNT],
            superseded: Vec::new(),
            next_id: 1,
            history: SwitchHistory::new(),
        })
    }

    /// Current switch state of `category`
    pub fn state(&self, category: Category) -> SwitchState {
        match self.phases[category.index()] {
            Phase::Stable(strategy) => SwitchState::Stable(strategy),
            Phase::Flipping { from, to } => SwitchState::Flipping { from, to },
            Phase::Draining(drain) => SwitchState::Draining {
                from: drain.from,
                to: drain.to,
                stale: drain.stale,
            },
        }
    }

    /// Finished requests, oldest first
    pub fn history(&self) -> Vec<SwitchRecord> {
        self.history.to_vec()
    }

    /// Start a switch: flip the slot and seal the old channel, then check
    /// the drain once.
    pub fn begin(&mut self, request: SwitchRequest) -> TransportResult<SwitchProgress> {
        let SwitchRequest { category, target } = request;
        let hub = Arc::clone(&self.hub);
        let now = self.clock.now_ns();

        let current = match self.phases[category.index()] {
            Phase::Stable(strategy) => strategy,
            Phase::Flipping { .. } | Phase::Draining(_) => {
                log::debug!("[SWITCH] {} busy, request for {} refused", category, target);
                return Err(TransportError::SwitchPending(category));
            },
        };

        if let Err(err) = hub.capabilities().check(category, target) {
            log::warn!("[SWITCH] {}", err);
            self.record(category, current, target, RecordOutcome::Rejected, now, now);
            return Err(err);
        }

        if target == current {
            log::debug!("[SWITCH] {} already on {}", category, target);
            return Ok(SwitchProgress::Complete(SwitchOutcome::Unchanged(current)));
        }

        let pair = hub.pair(category);
        let old = pair
            .get(current)
            .ok_or(TransportError::Internal("selected channel missing"))?;
        let new = pair.get_or_create(target, hub.config());
        if !new.reactivate() {
            log::error!(
                "[SWITCH] {} {} channel still holds events, cannot reuse it",
                category,
                target
            );
            return Err(TransportError::Internal("target channel not drained"));
        }

        self.phases[category.index()] = Phase::Flipping {
            from: current,
            to: target,
        };

        // The consumer must learn about the old channel before any producer
        // can see the new slot value.
        pair.set_draining(Some(current));
        let snapshot = hub.table().write(category, target);
        old.mark_inactive();

        let config = hub.config();
        self.phases[category.index()] = Phase::Draining(Drain {
            from: current,
            to: target,
            generation: snapshot.generation,
            grace: Deadline::starting_at(now, config.grace_period_ns),
            timeout: Deadline::starting_at(now, config.drain_timeout_ns),
            stale: false,
        });

        log::info!(
            "[SWITCH] {} flipped {} -> {} (generation {}), draining {} events",
            category,
            current,
            target,
            snapshot.generation,
            old.pending_count()
        );

        self.advance(category)
    }

    /// Re-check the drain of `category` without blocking
    pub fn advance(&mut self, category: Category) -> TransportResult<SwitchProgress> {
        let drain = match self.phases[category.index()] {
            Phase::Stable(strategy) => {
                return Ok(SwitchProgress::Complete(SwitchOutcome::Unchanged(strategy)));
            },
            Phase::Flipping { .. } => return Err(TransportError::Internal("switch stopped mid-flip")),
            Phase::Draining(drain) => drain,
        };

        let hub = Arc::clone(&self.hub);
        let old = hub
            .channel(category, drain.from)
            .ok_or(TransportError::Internal("draining channel missing"))?;

        if drain.stale {
            return Err(drain_timeout(category, old));
        }

        let now = self.clock.now_ns();
        if drain.grace.has_expired(now) && old.is_drained() {
            let outcome = self.retire(category, drain, old, RecordOutcome::Completed, now);
            return Ok(SwitchProgress::Complete(outcome));
        }

        if drain.timeout.has_expired(now) {
            self.phases[category.index()] = Phase::Draining(Drain {
                stale: true,
                ..drain
            });
            log::warn!(
                "[SWITCH] {} drain of {} timed out after {} ns: {} pending, {} in flight; channel leaked",
                category,
                drain.from,
                drain.timeout.elapsed(now),
                old.pending_count(),
                old.in_flight()
            );
            self.record(
                category,
                drain.from,
                drain.to,
                RecordOutcome::TimedOut,
                drain.grace.start_ns(),
                now,
            );
            return Err(drain_timeout(category, old));
        }

        Ok(SwitchProgress::Draining {
            pending: old.pending_count(),
            in_flight: old.in_flight(),
            remaining_ns: drain.timeout.remaining(now),
        })
    }

    /// Run a request to completion or drain timeout.
    ///
    /// The wait is measured on the controller's clock. If that clock stops
    /// moving for [`STALLED_CLOCK_SPINS`] checks in a row (a `ManualClock`
    /// nobody advances), this gives up with `Internal` and leaves the
    /// category `Draining`; [`advance`](Self::advance) picks it up later.
    pub fn switch(&mut self, request: SwitchRequest) -> TransportResult<SwitchOutcome> {
        let mut progress = self.begin(request)?;
        let mut last_ns = self.clock.now_ns();
        let mut still = 0;

        loop {
            match progress {
                SwitchProgress::Complete(outcome) => return Ok(outcome),
                SwitchProgress::Draining { .. } => {
                    let now = self.clock.now_ns();
                    if now == last_ns {
                        still += 1;
                        if still >= STALLED_CLOCK_SPINS {
                            log::error!(
                                "[SWITCH] {} clock stalled at {} ns while draining",
                                request.category,
                                now
                            );
                            return Err(TransportError::Internal("clock stalled while draining"));
                        }
                    } else {
                        last_ns = now;
                        still = 0;
                    }
                    relax();
                    progress = self.advance(request.category)?;
                },
            }
        }
    }

    /// Retire the old channel of a switch that is still draining, if it is
    /// empty now. Never called automatically.
    pub fn reclaim(&mut self, category: Category) -> TransportResult<SwitchOutcome> {
        let drain = match self.phases[category.index()] {
            Phase::Draining(drain) => drain,
            Phase::Stable(_) | Phase::Flipping { .. } => {
                return Err(TransportError::NotDraining(category));
            },
        };

        let hub = Arc::clone(&self.hub);
        let old = hub
            .channel(category, drain.from)
            .ok_or(TransportError::Internal("draining channel missing"))?;

        if !old.is_drained() {
            log::warn!(
                "[SWITCH] {} cannot reclaim {}: {} pending, {} in flight",
                category,
                drain.from,
                old.pending_count(),
                old.in_flight()
            );
            return Err(drain_timeout(category, old));
        }

        let now = self.clock.now_ns();
        Ok(self.retire(category, drain, old, RecordOutcome::Reclaimed, now))
    }

    /// Queue a request. A queued request for the same category is
    /// superseded.
    pub fn submit(&mut self, request: SwitchRequest) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let slot = &mut self.queued[request.category.index()];
        if let Some((old_id, old_request)) = slot.replace((id, request)) {
            log::debug!(
                "[SWITCH] Request {} for {} superseded by {}",
                old_id.as_u64(),
                old_request.category,
                id.as_u64()
            );
            let now = self.clock.now_ns();
            let from = self.hub.table().strategy(old_request.category);
            self.record(
                old_request.category,
                from,
                old_request.target,
                RecordOutcome::Superseded,
                now,
                now,
            );
            self.superseded.push(SwitchReport {
                id: old_id,
                request: old_request,
                result: Err(TransportError::Superseded {
                    category: old_request.category,
                    target: old_request.target,
                }),
            });
        }
        id
    }

    /// Execute queued requests, one report per submitted id in id order
    pub fn run_pending(&mut self) -> Vec<SwitchReport> {
        let mut reports = core::mem::take(&mut self.superseded);

        for category in Category::ALL {
            if let Some((id, request)) = self.queued[category.index()].take() {
                let result = self.switch(request);
                reports.push(SwitchReport {
                    id,
                    request,
                    result,
                });
            }
        }

        reports.sort_by_key(|report| report.id);
        reports
    }
}

impl<T> SwitchController<T> {
    fn retire(
        &mut self,
        category: Category,
        drain: Drain,
        old: &Channel<T>,
        outcome: RecordOutcome,
        now: u64,
    ) -> SwitchOutcome {
        old.retire();
        self.hub.pair(category).set_draining(None);
        self.phases[category.index()] = Phase::Stable(drain.to);

        let elapsed_ns = drain.grace.elapsed(now);
        log::info!(
            "[SWITCH] {} now stable on {}, {} retired after {} ns",
            category,
            drain.to,
            drain.from,
            elapsed_ns
        );
        self.history.push(SwitchRecord {
            category,
            from: drain.from,
            to: drain.to,
            generation: drain.generation,
            outcome,
            started_ns: drain.grace.start_ns(),
            finished_ns: now,
        });

        SwitchOutcome::Completed {
            from: drain.from,
            to: drain.to,
            generation: drain.generation,
            elapsed_ns,
        }
    }

    fn record(
        &mut self,
        category: Category,
        from: StrategyId,
        to: StrategyId,
        outcome: RecordOutcome,
        started_ns: u64,
        finished_ns: u64,
    ) {
        let generation = self.hub.table().read(category).generation;
        self.history.push(SwitchRecord {
            category,
            from,
            to,
            generation,
            outcome,
            started_ns,
            finished_ns,
        });
    }
}

impl<T> Drop for SwitchController<T> {
    fn drop(&mut self) {
        self.hub.release_controller();
    }
}

fn drain_timeout<T>(category: Category, old: &Channel<T>) -> TransportError {
    TransportError::DrainTimeout {
        category,
        stale: old.strategy(),
        pending: old.pending_count(),
        in_flight: old.in_flight(),
    }
}
