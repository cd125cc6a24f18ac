//! Unit-of-work lifecycle: runtime state and typestate handle

use crate::notify::now_millis;
use crate::{Coordinator, Error};

/// Identifier of one unit of work, unique within the process
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl UnitId {
    pub(crate) fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UnitId({})", self.0)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a coordinator is in its current unit of work.
///
/// `Idle -> Begun -> {Committed | RolledBack} -> Closed`. A coordinator at
/// `Idle` or `Closed` may begin a new unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitState {
    /// No unit has run yet
    Idle,
    /// Sources sealed, logic steps may run
    Begun,
    /// Every connection committed
    Committed,
    /// Connections rolled back after a step or commit failure
    RolledBack,
    /// Connections closed and the local registry unsealed
    Closed,
}

impl UnitState {
    /// Whether a unit is open (begun but not yet closed)
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Begun | Self::Committed | Self::RolledBack)
    }
}

pub mod markers {
    //! Phase markers for [`super::Unit`]

    /// Any unit phase
    pub trait UnitPhase: Send + 'static {}
    /// A phase from which the unit can only be closed
    pub trait Finished: UnitPhase {}
}

/// Sources sealed, logic running
pub struct Begun {
    /// When the unit began
    pub began_at_millis: u64,
}

/// All connections committed
pub struct Committed {
    /// When the commit fan-out finished
    pub committed_at_millis: u64,
}

/// All connections rolled back
pub struct RolledBack {
    /// When the rollback fan-out finished
    pub rolled_back_at_millis: u64,
}

impl markers::UnitPhase for Begun {}
impl markers::UnitPhase for Committed {}
impl markers::UnitPhase for RolledBack {}

impl markers::Finished for Committed {}
impl markers::Finished for RolledBack {}

/// An open unit of work on a [`Coordinator`].
///
/// Obtained from [`Coordinator::begin`]. The phase parameter only allows the
/// legal transitions: a begun unit commits or rolls back, a committed or
/// rolled back unit closes. Dropping a unit without closing it leaves its
/// connections open and the coordinator unusable until
/// [`Coordinator::force_close`].
#[must_use = "a unit must be committed or rolled back, then closed"]
pub struct Unit<'c, P: markers::UnitPhase> {
    coordinator: &'c Coordinator,
    id: UnitId,
    started_at_millis: u64,
    /// Phase data
    pub phase: P,
}

impl<'c, P: markers::UnitPhase> Unit<'c, P> {
    /// This unit's identifier
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// The coordinator the unit runs on
    pub fn coordinator(&self) -> &'c Coordinator {
        self.coordinator
    }

    fn advance<Q: markers::UnitPhase>(self, phase: Q) -> Unit<'c, Q> {
        Unit {
            coordinator: self.coordinator,
            id: self.id,
            started_at_millis: self.started_at_millis,
            phase,
        }
    }
}

impl<'c> Unit<'c, Begun> {
    pub(crate) fn new(coordinator: &'c Coordinator, id: UnitId, now_millis: u64) -> Self {
        Self {
            coordinator,
            id,
            started_at_millis: now_millis,
            phase: Begun {
                began_at_millis: now_millis,
            },
        }
    }

    /// Commit every connection concurrently.
    ///
    /// On failure the unit is handed back still begun, so the caller can roll
    /// back. Connections that did commit stay committed.
    pub async fn commit(self) -> Result<Unit<'c, Committed>, (Error, Unit<'c, Begun>)> {
        match self.coordinator.commit_connections(self.id).await {
            Ok(()) => Ok(self.advance(Committed {
                committed_at_millis: now_millis(),
            })),
            Err(err) => Err((err, self)),
        }
    }

    /// Roll back every connection concurrently
    pub async fn rollback(self) -> Unit<'c, RolledBack> {
        self.coordinator.rollback_connections(self.id).await;
        self.advance(RolledBack {
            rolled_back_at_millis: now_millis(),
        })
    }
}

impl<'c, P: markers::Finished> Unit<'c, P> {
    /// Close every connection, clear the cache and unseal the local registry
    pub async fn close(self) {
        let elapsed = now_millis().saturating_sub(self.started_at_millis);
        self.coordinator.close_unit(self.id, elapsed).await;
    }
}
