//! # Transport Hub
//!
//! Owns the selector table and every category's channel pair. Producers,
//! the consumer and the switch controller all hold the hub through an
//! `Arc`; nothing here is process-global.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::channel::{Channel, ChannelPair, ChannelStats};
use crate::config::TransportConfig;
use crate::probe::{CapabilityMap, CapabilityProber};
use crate::producer::Producer;
use crate::selector::SelectorTable;
use crate::{Category, StrategyId, TransportResult, CATEGORY_COUNT};

/// Shared transport state
#[derive(Debug)]
pub struct TransportHub<T> {
    config: TransportConfig,
    capabilities: CapabilityMap,
    table: SelectorTable,
    pairs: [ChannelPair<T>; CATEGORY_COUNT],
    consumers: [AtomicBool; CATEGORY_COUNT],
    controller: AtomicBool,
}

impl<T: Send + 'static> TransportHub<T> {
    /// Build a hub from a known capability map.
    ///
    /// Each category starts on the strategy chosen by
    /// [`CapabilityMap::initial_strategies`], with that channel created.
    pub fn new(config: TransportConfig, capabilities: CapabilityMap) -> TransportResult<Arc<Self>> {
        config.validate()?;
        let initial = capabilities.initial_strategies(&config)?;

        let hub = Self {
            table: SelectorTable::new(initial),
            pairs: Category::ALL.map(ChannelPair::new),
            consumers: [const { AtomicBool::new(false) }; CATEGORY_COUNT],
            controller: AtomicBool::new(false),
            capabilities,
            config,
        };

        for category in Category::ALL {
            let strategy = initial[category.index()];
            hub.pairs[category.index()].get_or_create(strategy, &hub.config);
            log::info!(
                "[HUB] {} starts on {} (supported: {:?})",
                category,
                strategy,
                hub.capabilities.supported(category)
            );
        }

        Ok(Arc::new(hub))
    }

    /// Probe capabilities, then build the hub
    pub fn probe(config: TransportConfig, prober: &dyn CapabilityProber) -> TransportResult<Arc<Self>> {
        let capabilities = prober.probe()?;
        Self::new(config, capabilities)
    }

    /// A producer handle for events raised on `cpu`
    pub fn producer(self: &Arc<Self>, cpu: usize) -> Producer<T> {
        Producer::new(Arc::clone(self), cpu)
    }
}

impl<T> TransportHub<T> {
    /// The selector table
    pub fn table(&self) -> &SelectorTable {
        &self.table
    }

    /// Capabilities the hub was built with
    pub fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    /// Configuration the hub was built with
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// A category's channel pair
    pub fn pair(&self, category: Category) -> &ChannelPair<T> {
        &self.pairs[category.index()]
    }

    /// The channel for (category, strategy), if created
    pub fn channel(&self, category: Category, strategy: StrategyId) -> Option<&Channel<T>> {
        self.pair(category).get(strategy)
    }

    /// Statistics of the channel for (category, strategy), if created
    pub fn channel_stats(&self, category: Category, strategy: StrategyId) -> Option<ChannelStats> {
        self.channel(category, strategy).map(Channel::stats)
    }

    pub(crate) fn claim_consumer(&self, category: Category) -> bool {
        self.consumers[category.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_consumer(&self, category: Category) {
        self.consumers[category.index()].store(false, Ordering::Release);
    }

    pub(crate) fn claim_controller(&self) -> bool {
        self.controller
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_controller(&self) {
        self.controller.store(false, Ordering::Release);
    }
}
