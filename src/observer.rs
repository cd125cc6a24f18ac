//! Unit-of-work observer trait

use std::collections::HashMap;

use crate::{Error, UnitId};

/// Observer trait for external observability.
///
/// Rollback and close cannot fail from the coordinator's point of view;
/// this is the side channel through which their outcome is seen.
pub trait UnitObserver: Send + Sync + 'static {
    /// A unit of work was opened
    fn on_unit_begun(&self, unit: UnitId);
    /// The logic step at `step_index` returned `error`
    fn on_step_failed(&self, unit: UnitId, step_index: usize, error: &Error);
    /// Every one of `connections` committed
    fn on_committed(&self, unit: UnitId, connections: usize);
    /// The connections in `failed` did not commit
    fn on_commit_failed(&self, unit: UnitId, failed: &HashMap<String, Error>);
    /// `rolled_back` connections were rolled back; committed ones are not counted
    fn on_rolled_back(&self, unit: UnitId, rolled_back: usize);
    /// `connections` were closed, `duration_millis` after the unit began
    fn on_closed(&self, unit: UnitId, connections: usize, duration_millis: u64);
}

/// No-op observer
pub struct NoOpObserver;

impl UnitObserver for NoOpObserver {
    fn on_unit_begun(&self, _unit: UnitId) {}
    fn on_step_failed(&self, _unit: UnitId, _step_index: usize, _error: &Error) {}
    fn on_committed(&self, _unit: UnitId, _connections: usize) {}
    fn on_commit_failed(&self, _unit: UnitId, _failed: &HashMap<String, Error>) {}
    fn on_rolled_back(&self, _unit: UnitId, _rolled_back: usize) {}
    fn on_closed(&self, _unit: UnitId, _connections: usize, _duration_millis: u64) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl UnitObserver for TracingObserver {
    fn on_unit_begun(&self, unit: UnitId) {
        tracing::debug!(unit_id = %unit, "Unit begun");
    }

    fn on_step_failed(&self, unit: UnitId, step_index: usize, error: &Error) {
        tracing::warn!(unit_id = %unit, step = step_index, error = %error, "Logic step failed");
    }

    fn on_committed(&self, unit: UnitId, connections: usize) {
        tracing::info!(unit_id = %unit, connections, "Unit committed");
    }

    fn on_commit_failed(&self, unit: UnitId, failed: &HashMap<String, Error>) {
        let names: Vec<&str> = failed.keys().map(String::as_str).collect();
        tracing::error!(unit_id = %unit, failed = ?names, "Unit commit failed");
    }

    fn on_rolled_back(&self, unit: UnitId, rolled_back: usize) {
        tracing::warn!(unit_id = %unit, rolled_back, "Unit rolled back");
    }

    fn on_closed(&self, unit: UnitId, connections: usize, duration_millis: u64) {
        tracing::debug!(unit_id = %unit, connections, duration_ms = duration_millis, "Unit closed");
    }
}
