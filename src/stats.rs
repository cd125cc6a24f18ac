//! Coordinator statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-coordinator statistics
pub struct CoordinatorStats {
    /// Units opened by `begin`
    pub units_begun: AtomicU64,
    /// Units whose commit succeeded for every connection
    pub units_committed: AtomicU64,
    /// Units that were rolled back, after a failed step or a failed commit
    pub units_rolled_back: AtomicU64,
    /// Connections created by sources
    pub connections_created: AtomicU64,
    /// Connections whose commit failed
    pub commit_failures: AtomicU64,
}

impl CoordinatorStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self {
            units_begun: AtomicU64::new(0),
            units_committed: AtomicU64::new(0),
            units_rolled_back: AtomicU64::new(0),
            connections_created: AtomicU64::new(0),
            commit_failures: AtomicU64::new(0),
        }
    }

    pub(crate) fn record(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            units_begun: self.units_begun.load(Ordering::Relaxed),
            units_committed: self.units_committed.load(Ordering::Relaxed),
            units_rolled_back: self.units_rolled_back.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for CoordinatorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of [`CoordinatorStats`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorStatsSnapshot {
    /// Units opened
    pub units_begun: u64,
    /// Units committed
    pub units_committed: u64,
    /// Units rolled back
    pub units_rolled_back: u64,
    /// Connections created
    pub connections_created: u64,
    /// Connections whose commit failed, summed over all units
    pub commit_failures: u64,
}
