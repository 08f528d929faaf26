//! Router counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the router and session loops
#[derive(Debug, Default)]
pub struct RouterStats {
    delivered: AtomicU64,
    offline: AtomicU64,
    evicted: AtomicU64,
    malformed: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Messages placed in a recipient mailbox
    pub delivered: u64,
    /// Private messages dropped because the receiver was not registered
    pub offline: u64,
    /// Sessions dropped because their mailbox was full or closed
    pub evicted: u64,
    /// Inbound frames rejected by decode or validation
    pub malformed: u64,
    pub opened: u64,
    pub closed: u64,
}

impl RouterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self, n: usize) {
        self.delivered.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_offline(&self) {
        self.offline.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            offline: self.offline.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}
