//! Synchronizer counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by every entry of one manager.
#[derive(Debug, Default)]
pub struct SyncStats {
    messages_received: AtomicU64,
    messages_processed: AtomicU64,
    dropped_irrelevant: AtomicU64,
    dropped_malformed: AtomicU64,
    discarded_inactive: AtomicU64,
    fetches_issued: AtomicU64,
    fetches_resolved: AtomicU64,
    fetch_failures: AtomicU64,
    patches_applied: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatsSnapshot {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub dropped_irrelevant: u64,
    pub dropped_malformed: u64,
    pub discarded_inactive: u64,
    pub fetches_issued: u64,
    pub fetches_resolved: u64,
    pub fetch_failures: u64,
    pub patches_applied: u64,
    pub invalidations: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl SyncStats {
            $(
                pub fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    record_received => messages_received,
    record_processed => messages_processed,
    record_irrelevant => dropped_irrelevant,
    record_malformed => dropped_malformed,
    record_inactive => discarded_inactive,
    record_fetch_issued => fetches_issued,
    record_fetch_resolved => fetches_resolved,
    record_fetch_failure => fetch_failures,
    record_patch => patches_applied,
    record_invalidation => invalidations,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            dropped_irrelevant: self.dropped_irrelevant.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            discarded_inactive: self.discarded_inactive.load(Ordering::Relaxed),
            fetches_issued: self.fetches_issued.load(Ordering::Relaxed),
            fetches_resolved: self.fetches_resolved.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            patches_applied: self.patches_applied.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl SyncStatsSnapshot {
    /// Share of received messages that led to no cache work (0.0 to 1.0).
    pub fn drop_rate(&self) -> f64 {
        if self.messages_received == 0 {
            0.0
        } else {
            (self.dropped_irrelevant + self.dropped_malformed + self.discarded_inactive) as f64
                / self.messages_received as f64
        }
    }
}
