//! End-to-end switchover scenarios with real producer and consumer threads.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use warden_hal::{ManualClock, MonotonicClock, NS_PER_MS};

use crate::channel::ChannelState;
use crate::consumer::{Consumer, Record};
use crate::hub::TransportHub;
use crate::probe::{CapabilityMap, StaticProber, StrategySet};
use crate::switch::{SwitchController, SwitchOutcome, SwitchProgress, SwitchRequest, SwitchState};
use crate::{Category, StrategyId, TransportConfig, TransportError};

const TO_MODERN: SwitchRequest = SwitchRequest::new(Category::SyscallMonitor, StrategyId::Modern);

fn legacy_hub(config: TransportConfig) -> Arc<TransportHub<u32>> {
    let prober = StaticProber(CapabilityMap::uniform(StrategySet::all()));
    TransportHub::probe(config.with_preferred_strategy(StrategyId::Legacy), &prober).unwrap()
}

/// Read `expected` records of `category` on a separate thread
fn spawn_consumer(
    hub: Arc<TransportHub<u32>>,
    category: Category,
    expected: usize,
) -> thread::JoinHandle<Vec<Record<u32>>> {
    thread::spawn(move || {
        let mut consumer = Consumer::attach(hub, category).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut records = Vec::with_capacity(expected);
        while records.len() < expected && Instant::now() < deadline {
            match consumer.poll() {
                Some(record) => records.push(record),
                None => thread::yield_now(),
            }
        }
        records
    })
}

fn sorted_payloads(records: &[Record<u32>]) -> Vec<u32> {
    let mut payloads: Vec<u32> = records.iter().map(|record| record.payload).collect();
    payloads.sort_unstable();
    payloads
}

#[test]
fn switch_at_midpoint_delivers_every_event_once() {
    const CPUS: usize = 4;
    const PER_CATEGORY: usize = 1000;
    const PER_CPU: usize = PER_CATEGORY / CPUS;
    const HALF: usize = PER_CPU / 2;

    let hub = legacy_hub(TransportConfig::default().with_cpu_count(CPUS));
    let mut controller =
        SwitchController::attach(Arc::clone(&hub), Arc::new(MonotonicClock::new())).unwrap();
    let consumers: Vec<_> = Category::ALL
        .iter()
        .map(|&category| spawn_consumer(Arc::clone(&hub), category, PER_CATEGORY))
        .collect();

    let midpoint = Arc::new(Barrier::new(CPUS + 1));
    let resume = Arc::new(Barrier::new(CPUS + 1));
    let after_flip = Arc::new(AtomicUsize::new(0));
    let producers: Vec<_> = (0..CPUS)
        .map(|cpu| {
            let producer = hub.producer(cpu);
            let midpoint = Arc::clone(&midpoint);
            let resume = Arc::clone(&resume);
            let after_flip = Arc::clone(&after_flip);
            thread::spawn(move || {
                for seq in 0..PER_CPU {
                    if seq == HALF {
                        midpoint.wait();
                        resume.wait();
                    }
                    let id = (cpu * PER_CPU + seq) as u32;
                    for category in Category::ALL {
                        producer.emit(category, id).unwrap();
                    }
                    if seq >= HALF {
                        after_flip.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    // Flip while every producer is parked halfway, then let them run into
    // the drain.
    midpoint.wait();
    let mut progress = controller.begin(TO_MODERN).unwrap();
    resume.wait();

    while after_flip.load(Ordering::SeqCst) < CPUS {
        thread::yield_now();
    }
    assert!(matches!(
        controller.state(Category::SyscallMonitor),
        SwitchState::Draining { stale: false, .. }
    ));

    let outcome = loop {
        match progress {
            SwitchProgress::Complete(outcome) => break outcome,
            SwitchProgress::Draining { .. } => {
                thread::yield_now();
                progress = controller.advance(Category::SyscallMonitor).unwrap();
            },
        }
    };
    assert!(matches!(
        outcome,
        SwitchOutcome::Completed {
            from: StrategyId::Legacy,
            to: StrategyId::Modern,
            generation: 1,
            ..
        }
    ));

    for producer in producers {
        producer.join().unwrap();
    }
    let results: Vec<_> = consumers.into_iter().map(|c| c.join().unwrap()).collect();

    let expected: Vec<u32> = (0..PER_CATEGORY as u32).collect();
    for (category, records) in Category::ALL.iter().zip(&results) {
        assert_eq!(sorted_payloads(records), expected, "{}", category);
    }

    // First halves went out before the flip, second halves after it
    let via = |strategy| results[0].iter().filter(|r| r.source == strategy).count();
    assert_eq!(via(StrategyId::Legacy), CPUS * HALF);
    assert_eq!(via(StrategyId::Modern), PER_CATEGORY - CPUS * HALF);

    let legacy = hub
        .channel_stats(Category::SyscallMonitor, StrategyId::Legacy)
        .unwrap();
    assert_eq!(legacy.pending, 0);
    assert_eq!(legacy.state, ChannelState::Retired);
    assert_eq!(
        controller.state(Category::SyscallMonitor),
        SwitchState::Stable(StrategyId::Modern)
    );

    // The other category never moved
    let untouched = hub.table().read(Category::PerfBufferMonitor);
    assert_eq!((untouched.strategy, untouched.generation), (StrategyId::Legacy, 0));
    assert!(hub.channel(Category::PerfBufferMonitor, StrategyId::Modern).is_none());
    assert!(results[1].iter().all(|r| r.source == StrategyId::Legacy));
    assert_eq!(hub.table().abi_snapshot(), [1, 0]);
}

#[test]
fn repeated_switches_never_duplicate_or_lose() {
    const CPUS: usize = 4;
    const PER_CPU: usize = 2000;
    const HALF: usize = PER_CPU / 2;
    const BETWEEN_FLIPS: usize = 10 * CPUS;

    let config = TransportConfig::default()
        .with_cpu_count(CPUS)
        .with_legacy_ring_capacity(PER_CPU)
        .with_modern_ring_capacity(CPUS * PER_CPU);
    let hub = legacy_hub(config);
    let mut controller =
        SwitchController::attach(Arc::clone(&hub), Arc::new(MonotonicClock::new())).unwrap();
    let consumer = spawn_consumer(Arc::clone(&hub), Category::SyscallMonitor, CPUS * PER_CPU);

    let midpoint = Arc::new(Barrier::new(CPUS + 1));
    let resume = Arc::new(Barrier::new(CPUS + 1));
    let after_flip = Arc::new(AtomicUsize::new(0));
    let producers: Vec<_> = (0..CPUS)
        .map(|cpu| {
            let producer = hub.producer(cpu);
            let midpoint = Arc::clone(&midpoint);
            let resume = Arc::clone(&resume);
            let after_flip = Arc::clone(&after_flip);
            thread::spawn(move || {
                for seq in 0..PER_CPU {
                    if seq == HALF {
                        midpoint.wait();
                        resume.wait();
                    }
                    producer
                        .emit(Category::SyscallMonitor, (cpu * PER_CPU + seq) as u32)
                        .unwrap();
                    if seq >= HALF {
                        after_flip.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    midpoint.wait();
    controller.switch(TO_MODERN).unwrap();
    resume.wait();

    // Some events must travel the modern channel before the next flip; the
    // remaining flips race the second halves.
    while after_flip.load(Ordering::SeqCst) < BETWEEN_FLIPS {
        thread::yield_now();
    }
    for round in 1..6 {
        let target = if round % 2 == 0 {
            StrategyId::Modern
        } else {
            StrategyId::Legacy
        };
        controller
            .switch(SwitchRequest::new(Category::SyscallMonitor, target))
            .unwrap();
    }

    for producer in producers {
        producer.join().unwrap();
    }
    let records = consumer.join().unwrap();

    let expected: Vec<u32> = (0..(CPUS * PER_CPU) as u32).collect();
    assert_eq!(sorted_payloads(&records), expected);

    let via = |strategy| records.iter().filter(|r| r.source == strategy).count();
    assert!(via(StrategyId::Legacy) >= CPUS * HALF);
    assert!(via(StrategyId::Modern) >= BETWEEN_FLIPS);

    assert_eq!(hub.table().read(Category::SyscallMonitor).generation, 6);
    assert_eq!(hub.table().strategy(Category::SyscallMonitor), StrategyId::Legacy);
    assert_eq!(controller.history().len(), 6);
}

#[test]
fn reservation_taken_before_flip_lands_in_old_channel() {
    let hub = legacy_hub(TransportConfig::default().with_cpu_count(2));
    let clock = Arc::new(ManualClock::new(0));
    let mut controller = SwitchController::attach(Arc::clone(&hub), clock.clone()).unwrap();
    let mut consumer = Consumer::attach(Arc::clone(&hub), Category::SyscallMonitor).unwrap();
    let producer = hub.producer(0);

    let held = producer.reserve(Category::SyscallMonitor).unwrap();
    assert_eq!(held.strategy(), StrategyId::Legacy);

    let progress = controller.begin(TO_MODERN).unwrap();
    assert!(matches!(progress, SwitchProgress::Draining { in_flight: 1, .. }));

    held.commit(42).unwrap();
    let late = producer.emit(Category::SyscallMonitor, 43).unwrap();
    assert_eq!(late.strategy, StrategyId::Modern);

    clock.advance(hub.config().grace_period_ns);
    assert!(matches!(
        controller.advance(Category::SyscallMonitor),
        Ok(SwitchProgress::Draining {
            pending: 1,
            in_flight: 0,
            ..
        })
    ));

    let seen: Vec<_> = consumer
        .poll_batch(10)
        .into_iter()
        .map(|record| (record.source, record.payload))
        .collect();
    assert_eq!(seen, [(StrategyId::Modern, 43), (StrategyId::Legacy, 42)]);

    assert!(matches!(
        controller.advance(Category::SyscallMonitor),
        Ok(SwitchProgress::Complete(SwitchOutcome::Completed { .. }))
    ));
}

#[test]
fn stuck_producer_times_out_but_slot_stays_moved() {
    let config = TransportConfig::default()
        .with_cpu_count(2)
        .with_grace_period_ns(NS_PER_MS)
        .with_drain_timeout_ns(20 * NS_PER_MS);
    let hub = legacy_hub(config);
    let mut controller =
        SwitchController::attach(Arc::clone(&hub), Arc::new(MonotonicClock::new())).unwrap();
    let mut consumer = Consumer::attach(Arc::clone(&hub), Category::SyscallMonitor).unwrap();
    let stuck = hub.producer(0);

    let held = stuck.reserve(Category::SyscallMonitor).unwrap();
    assert_eq!(
        controller.switch(TO_MODERN),
        Err(TransportError::DrainTimeout {
            category: Category::SyscallMonitor,
            stale: StrategyId::Legacy,
            pending: 0,
            in_flight: 1,
        })
    );

    // Later producers use the new strategy
    assert_eq!(hub.table().strategy(Category::SyscallMonitor), StrategyId::Modern);
    assert_eq!(
        hub.producer(1).emit(Category::SyscallMonitor, 2).unwrap().strategy,
        StrategyId::Modern
    );
    assert_eq!(
        controller.begin(SwitchRequest::new(Category::SyscallMonitor, StrategyId::Legacy)),
        Err(TransportError::SwitchPending(Category::SyscallMonitor))
    );

    // The leaked channel keeps its events until someone reclaims it
    held.commit(1).unwrap();
    let payloads: Vec<u32> = consumer
        .poll_batch(10)
        .into_iter()
        .map(|record| record.payload)
        .collect();
    assert_eq!(payloads, [2, 1]);

    assert!(controller.reclaim(Category::SyscallMonitor).is_ok());
    assert_eq!(
        controller.state(Category::SyscallMonitor),
        SwitchState::Stable(StrategyId::Modern)
    );
}

#[test]
fn switch_to_current_strategy_changes_nothing() {
    let hub = legacy_hub(TransportConfig::default().with_cpu_count(2));
    let mut controller =
        SwitchController::attach(Arc::clone(&hub), Arc::new(ManualClock::new(0))).unwrap();
    hub.producer(1).emit(Category::PerfBufferMonitor, 9).unwrap();

    let snapshot = hub.table().abi_snapshot();
    let stats = hub.channel_stats(Category::PerfBufferMonitor, StrategyId::Legacy);
    let request = SwitchRequest::new(Category::PerfBufferMonitor, StrategyId::Legacy);

    for _ in 0..3 {
        assert_eq!(
            controller.switch(request),
            Ok(SwitchOutcome::Unchanged(StrategyId::Legacy))
        );
    }

    assert_eq!(hub.table().abi_snapshot(), snapshot);
    assert_eq!(hub.table().read(Category::PerfBufferMonitor).generation, 0);
    assert_eq!(
        hub.channel_stats(Category::PerfBufferMonitor, StrategyId::Legacy),
        stats
    );
    assert!(controller.history().is_empty());
}

#[test]
fn unsupported_target_is_refused_without_side_effects() {
    let caps = CapabilityMap::uniform(StrategySet::all())
        .with(Category::PerfBufferMonitor, StrategySet::LEGACY);
    let hub: Arc<TransportHub<u32>> = TransportHub::new(
        TransportConfig::default()
            .with_cpu_count(1)
            .with_grace_period_ns(0)
            .with_preferred_strategy(StrategyId::Legacy),
        caps,
    )
    .unwrap();
    let mut controller =
        SwitchController::attach(Arc::clone(&hub), Arc::new(ManualClock::new(0))).unwrap();

    let request = SwitchRequest::new(Category::PerfBufferMonitor, StrategyId::Modern);
    assert_eq!(
        controller.switch(request),
        Err(TransportError::UnsupportedStrategy {
            category: Category::PerfBufferMonitor,
            strategy: StrategyId::Modern,
        })
    );
    assert_eq!(hub.table().abi_snapshot(), [0, 0]);
    assert!(hub.channel(Category::PerfBufferMonitor, StrategyId::Modern).is_none());

    // The supported category can still move
    controller.submit(TO_MODERN);
    let reports = controller.run_pending();
    assert!(matches!(
        reports[0].result,
        Ok(SwitchOutcome::Completed { .. })
    ));
}
