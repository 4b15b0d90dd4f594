//! # Producers
//!
//! The emitting side: one handle per concurrently executing context (a CPU
//! in the kernel, a thread in tests). Emitting never blocks on the switch
//! controller.
//!
//! ## Routing
//!
//! 1. Read the category slot: `(strategy, generation)`.
//! 2. Enter the in-flight gate of that strategy's channel.
//! 3. If the gate is sealed, a switch happened after step 1. Re-read the
//!    slot; when the generation moved, route to the new strategy. An
//!    unchanged generation means the channel really refused the event.
//! 4. Store the event and leave the gate.
//!
//! An event whose gate entry preceded the seal lands in the old channel and
//! is part of that channel's drain set. An event turned away by the seal is
//! re-routed. Either way it is delivered exactly once.

use alloc::sync::Arc;

use crate::channel::{ChannelReservation, Rejected};
use crate::hub::TransportHub;
use crate::selector::SlotSnapshot;
use crate::{Category, StrategyId, TransportError, TransportResult};

/// Upper bound on re-routes for one event. Every re-route needs a slot write
/// between two reads, so this is only reached under a storm of switches.
pub const MAX_REROUTES: usize = 8;

/// Where an event went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Strategy of the channel that accepted the event
    pub strategy: StrategyId,
    /// Slot generation the routing decision was based on
    pub generation: u32,
    /// Number of times the event was re-routed after a concurrent switch
    pub reroutes: usize,
}

/// Emitting handle bound to one CPU
#[derive(Debug)]
pub struct Producer<T> {
    hub: Arc<TransportHub<T>>,
    cpu: usize,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            cpu: self.cpu,
        }
    }
}

impl<T> Producer<T> {
    /// Create a producer for events raised on `cpu`
    pub fn new(hub: Arc<TransportHub<T>>, cpu: usize) -> Self {
        Self { hub, cpu }
    }

    /// CPU this producer emits on
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Route and hold a gate slot for one event of `category`.
    ///
    /// The switch controller cannot retire the chosen channel until the
    /// reservation is committed or dropped.
    pub fn reserve(&self, category: Category) -> TransportResult<Reservation<'_, T>> {
        let table = self.hub.table();
        self.reserve_with(category, || table.read(category))
    }

    /// Routing loop over an arbitrary slot source
    fn reserve_with(
        &self,
        category: Category,
        mut read_slot: impl FnMut() -> SlotSnapshot,
    ) -> TransportResult<Reservation<'_, T>> {
        let pair = self.hub.pair(category);
        let mut snapshot = read_slot();
        let mut reroutes = 0;

        loop {
            let channel = pair.get(snapshot.strategy).ok_or_else(|| {
                log::error!(
                    "[PRODUCER] {} selects {} but that channel does not exist",
                    category,
                    snapshot.strategy
                );
                TransportError::Internal("selected channel missing")
            })?;

            match channel.reserve() {
                Ok(inner) => {
                    return Ok(Reservation {
                        inner,
                        cpu: self.cpu,
                        delivery: Delivery {
                            strategy: snapshot.strategy,
                            generation: snapshot.generation,
                            reroutes,
                        },
                    });
                },
                Err(Rejected::Inactive) | Err(Rejected::Full) => {
                    let current = read_slot();
                    if current.generation == snapshot.generation || reroutes >= MAX_REROUTES {
                        log::warn!(
                            "[PRODUCER] {} {} refused event on cpu {}",
                            category,
                            snapshot.strategy,
                            self.cpu
                        );
                        return Err(TransportError::ChannelFull {
                            category,
                            strategy: snapshot.strategy,
                        });
                    }
                    log::trace!(
                        "[PRODUCER] {} re-routed {} -> {} (generation {} -> {})",
                        category,
                        snapshot.strategy,
                        current.strategy,
                        snapshot.generation,
                        current.generation
                    );
                    snapshot = current;
                    reroutes += 1;
                },
            }
        }
    }

    /// Route one event of `category`
    pub fn emit(&self, category: Category, event: T) -> TransportResult<Delivery> {
        self.reserve(category)?.commit(event)
    }
}

/// A routed, not yet stored event slot
pub struct Reservation<'a, T> {
    inner: ChannelReservation<'a, T>,
    cpu: usize,
    delivery: Delivery,
}

impl<T> core::fmt::Debug for Reservation<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reservation")
            .field("cpu", &self.cpu)
            .field("delivery", &self.delivery)
            .finish()
    }
}

impl<T> Reservation<'_, T> {
    /// Strategy the event will be stored in
    pub fn strategy(&self) -> StrategyId {
        self.delivery.strategy
    }

    /// Slot generation the route was chosen under
    pub fn generation(&self) -> u32 {
        self.delivery.generation
    }

    /// Store the event.
    ///
    /// A full channel loses the event under its own policy and reports
    /// `ChannelFull`; nothing is retried or buffered here.
    pub fn commit(self, event: T) -> TransportResult<Delivery> {
        let channel = self.inner.channel();
        let delivery = self.delivery;
        match self.inner.commit(self.cpu, event) {
            Ok(()) => Ok(delivery),
            Err(_) => Err(TransportError::ChannelFull {
                category: channel.category(),
                strategy: channel.strategy(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::probe::{CapabilityMap, StrategySet};

    fn hub(config: TransportConfig) -> Arc<TransportHub<u32>> {
        TransportHub::new(
            config.with_preferred_strategy(StrategyId::Legacy),
            CapabilityMap::uniform(StrategySet::all()),
        )
        .unwrap()
    }

    #[test]
    fn test_emit_routes_to_selected_channel() {
        let hub = hub(TransportConfig::default().with_cpu_count(2));
        let producer = hub.producer(1);

        let delivery = producer.emit(Category::SyscallMonitor, 7).unwrap();
        assert_eq!(
            delivery,
            Delivery {
                strategy: StrategyId::Legacy,
                generation: 0,
                reroutes: 0
            }
        );

        let legacy = hub.channel(Category::SyscallMonitor, StrategyId::Legacy).unwrap();
        assert_eq!(legacy.pending_count(), 1);
        assert_eq!(legacy.dequeue(), Some(7));
    }

    #[test]
    fn test_full_channel_reports_without_retry() {
        let hub = hub(
            TransportConfig::default()
                .with_cpu_count(1)
                .with_legacy_ring_capacity(1),
        );
        let producer = hub.producer(0);

        producer.emit(Category::PerfBufferMonitor, 1).unwrap();
        assert_eq!(
            producer.emit(Category::PerfBufferMonitor, 2),
            Err(TransportError::ChannelFull {
                category: Category::PerfBufferMonitor,
                strategy: StrategyId::Legacy,
            })
        );
        let stats = hub
            .channel_stats(Category::PerfBufferMonitor, StrategyId::Legacy)
            .unwrap();
        assert_eq!(stats.rejected_full, 1);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn test_sealed_channel_reroutes_after_flip() {
        let hub = hub(TransportConfig::default().with_cpu_count(1));
        let producer = hub.producer(0);

        // Stand in for the controller's flip + seal.
        let pair = hub.pair(Category::SyscallMonitor);
        pair.get_or_create(StrategyId::Modern, hub.config());
        hub.table().write(Category::SyscallMonitor, StrategyId::Modern);
        pair.get(StrategyId::Legacy).unwrap().mark_inactive();

        let delivery = producer.emit(Category::SyscallMonitor, 9).unwrap();
        assert_eq!(delivery.strategy, StrategyId::Modern);
        assert_eq!(delivery.generation, 1);
        assert_eq!(pair.get(StrategyId::Modern).unwrap().dequeue(), Some(9));
    }

    #[test]
    fn test_sealed_without_flip_is_refused() {
        let hub = hub(TransportConfig::default().with_cpu_count(1));
        let producer = hub.producer(0);

        hub.channel(Category::SyscallMonitor, StrategyId::Legacy)
            .unwrap()
            .mark_inactive();

        assert!(matches!(
            producer.emit(Category::SyscallMonitor, 1),
            Err(TransportError::ChannelFull { .. })
        ));
    }

    #[test]
    fn test_reservation_holds_gate() {
        let hub = hub(TransportConfig::default().with_cpu_count(1));
        let producer = hub.producer(0);
        let legacy = hub.channel(Category::SyscallMonitor, StrategyId::Legacy).unwrap();

        let reservation = producer.reserve(Category::SyscallMonitor).unwrap();
        assert_eq!(reservation.strategy(), StrategyId::Legacy);
        assert_eq!(legacy.in_flight(), 1);

        reservation.commit(3).unwrap();
        assert_eq!(legacy.in_flight(), 0);
        assert_eq!(legacy.pending_count(), 1);
    }

    #[test]
    fn test_reroutes_are_bounded() {
        let hub = hub(TransportConfig::default().with_cpu_count(1));
        let producer = hub.producer(0);
        let pair = hub.pair(Category::SyscallMonitor);
        pair.get_or_create(StrategyId::Modern, hub.config());
        for strategy in StrategyId::ALL {
            pair.get(strategy).unwrap().mark_inactive();
        }

        // Every read sees a fresh flip, as under a storm of switches.
        let mut reads = 0u32;
        let result = producer.reserve_with(Category::SyscallMonitor, || {
            reads += 1;
            SlotSnapshot {
                strategy: StrategyId::ALL[(reads % 2) as usize],
                generation: reads,
            }
        });

        assert!(matches!(
            result,
            Err(TransportError::ChannelFull {
                category: Category::SyscallMonitor,
                ..
            })
        ));
        assert_eq!(reads as usize, MAX_REROUTES + 2);
        for strategy in StrategyId::ALL {
            let stats = hub.channel_stats(Category::SyscallMonitor, strategy).unwrap();
            assert_eq!(stats.in_flight, 0);
        }
    }
}
