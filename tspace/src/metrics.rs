//! Space metrics
//!
//! Lock-free counters recorded by the engines, sweeper and listener
//! registry, plus a point-in-time snapshot for reporting.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for a single space
#[derive(Debug, Default)]
pub struct SpaceMetrics {
    /// Successful out/push/put calls
    pub inserts: AtomicU64,

    /// Values removed by in/inp (key or template)
    pub takes: AtomicU64,

    /// Values returned by rd/rdp without removal
    pub reads: AtomicU64,

    /// Probes that found nothing
    pub probe_misses: AtomicU64,

    /// Timed or cancelled waits that ended empty-handed
    pub timeouts: AtomicU64,

    /// Expired entries discarded lazily or by the sweeper
    pub expired: AtomicU64,

    /// Sweeper generation ticks completed
    pub sweeps: AtomicU64,

    /// Key records dropped from the table
    pub records_removed: AtomicU64,

    /// Listener callbacks invoked
    pub listeners_fired: AtomicU64,

    /// Listener callbacks that panicked
    pub listener_panics: AtomicU64,

    /// Sweeper ticks that panicked
    pub sweep_panics: AtomicU64,
}

impl SpaceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_take(&self) {
        self.takes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe_miss(&self) {
        self.probe_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: usize) {
        if count > 0 {
            self.expired.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removed_record(&self) {
        self.records_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_fired(&self) {
        self.listeners_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_panic(&self) {
        self.listener_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep_panic(&self) {
        self.sweep_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            inserts: self.inserts.load(Ordering::Relaxed),
            takes: self.takes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            probe_misses: self.probe_misses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            records_removed: self.records_removed.load(Ordering::Relaxed),
            listeners_fired: self.listeners_fired.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
            sweep_panics: self.sweep_panics.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of space metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub inserts: u64,
    pub takes: u64,
    pub reads: u64,
    pub probe_misses: u64,
    pub timeouts: u64,
    pub expired: u64,
    pub sweeps: u64,
    pub records_removed: u64,
    pub listeners_fired: u64,
    pub listener_panics: u64,
    pub sweep_panics: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserts={} takes={} reads={} misses={} timeouts={} expired={} sweeps={} removed={} fired={} panics={} sweep_panics={}",
            self.inserts,
            self.takes,
            self.reads,
            self.probe_misses,
            self.timeouts,
            self.expired,
            self.sweeps,
            self.records_removed,
            self.listeners_fired,
            self.listener_panics,
            self.sweep_panics
        )
    }
}
