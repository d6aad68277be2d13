//! In-process hub counters.
//!
//! Shared between the dispatch loop, connection actors and the fanout
//! subscriber. Every update here is mirrored to the Prometheus exporter, so
//! status queries and exported metrics never disagree.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::observability::metrics as prom;

#[derive(Debug, Default)]
pub struct HubMetrics {
    /// Connection actors currently running (registered or not).
    active_connections: AtomicUsize,
    /// Broadcast events that reached local delivery.
    events_dispatched: AtomicU64,
    /// Frames enqueued onto outbound queues.
    deliveries: AtomicU64,
    /// Connections force-removed during delivery.
    evictions: AtomicU64,
    /// Events the processor refused.
    processor_drops: AtomicU64,
    bus_published: AtomicU64,
    bus_publish_failures: AtomicU64,
    /// Events accepted from the bus.
    bus_received: AtomicU64,
}

/// Point-in-time copy of [`HubMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubMetricsSnapshot {
    pub active_connections: usize,
    pub events_dispatched: u64,
    pub deliveries: u64,
    pub evictions: u64,
    pub processor_drops: u64,
    pub bus_published: u64,
    pub bus_publish_failures: u64,
    pub bus_received: u64,
}

impl HubMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        prom::record_connection_opened();
    }

    /// A close without a matching open changes nothing, here or in the gauge.
    pub fn connection_closed(&self) {
        let decremented = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1))
            .is_ok();
        if decremented {
            prom::record_connection_closed();
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn record_dispatch(&self, from_bus: bool, delivered: usize) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        prom::record_event_dispatched(from_bus);
        prom::record_deliveries(delivered);
    }

    #[must_use]
    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched.load(Ordering::Relaxed)
    }

    pub fn record_eviction(&self, reason: &'static str) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        prom::record_eviction(reason);
    }

    pub fn record_processor_drop(&self) {
        self.processor_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish(&self, ok: bool) {
        if ok {
            self.bus_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bus_publish_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_bus_received(&self) {
        self.bus_received.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            processor_drops: self.processor_drops.load(Ordering::Relaxed),
            bus_published: self.bus_published.load(Ordering::Relaxed),
            bus_publish_failures: self.bus_publish_failures.load(Ordering::Relaxed),
            bus_received: self.bus_received.load(Ordering::Relaxed),
        }
    }
}
