//! The coordinator: registries, connection cache and unit lifecycle

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::notify::now_millis;
use crate::source::Sources;
use crate::state::{Begun, Unit};
use crate::{
    Connection, ConnectionManager, CoordinatorStats, Error, GlobalSources, NoOpObserver, Source,
    TxnError, UnitId, UnitObserver, UnitState,
};

/// Owns a local source registry and the connections of one unit of work at
/// a time.
///
/// Logic steps receive the coordinator (usually through a narrower trait the
/// application implements for it) and reach resources with [`get`].
///
/// ```rust,ignore
/// let global = Arc::new(GlobalSources::new());
/// global.add("orders", OrdersSource::new(pool));
///
/// let coordinator = Coordinator::new(global).with_observer(Arc::new(TracingObserver));
/// coordinator.add_local_source("audit", AuditSource::default());
///
/// run_txn(&coordinator, &[&ReserveStock, &WriteAudit]).await?;
/// ```
///
/// [`get`]: Coordinator::get
pub struct Coordinator {
    sources: Sources,
    connections: ConnectionManager,
    state: Mutex<UnitState>,
    observer: Arc<dyn UnitObserver>,
    stats: Arc<CoordinatorStats>,
}

impl Coordinator {
    /// Create a coordinator backed by the process's global sources
    pub fn new(global: Arc<GlobalSources>) -> Self {
        Self {
            sources: Sources::new(global),
            connections: ConnectionManager::new(),
            state: Mutex::new(UnitState::Idle),
            observer: Arc::new(NoOpObserver),
            stats: Arc::new(CoordinatorStats::new()),
        }
    }

    /// Report lifecycle events to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn UnitObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Count into `stats`, which may be shared between coordinators
    pub fn with_stats(mut self, stats: Arc<CoordinatorStats>) -> Self {
        self.stats = stats;
        self
    }

    /// This coordinator's statistics
    pub fn stats(&self) -> &Arc<CoordinatorStats> {
        &self.stats
    }

    /// Current lifecycle state
    pub fn state(&self) -> UnitState {
        *self.lock_state()
    }

    /// Register a source visible only to this coordinator.
    ///
    /// Ignored while a unit of work is open.
    pub fn add_local_source<S: Source>(&self, name: impl Into<String>, source: S) {
        self.sources.add_local(name, source);
    }

    /// Whether the local registry currently rejects additions
    pub fn local_sealed(&self) -> bool {
        self.sources.local_sealed()
    }

    /// Names of the connections created in the current unit
    pub fn connection_names(&self) -> Vec<String> {
        self.connections.names()
    }

    /// The connection for `name`, created on first use within a unit.
    ///
    /// Local sources shadow global ones. Fails with
    /// [`TxnError::SourceNotFound`], [`TxnError::FailToCreateConnection`]
    /// (the source's error as cause) or, when the connection is not a `C`,
    /// [`TxnError::ConnectionTypeMismatch`].
    pub async fn get<C: Connection>(&self, name: &str) -> Result<Arc<C>, Error> {
        let (created, fresh) = self.connections.get(name, &self.sources).await?;
        if fresh {
            CoordinatorStats::record(&self.stats.connections_created, 1);
        }
        created.any.downcast::<C>().map_err(|_| {
            Error::new(TxnError::ConnectionTypeMismatch {
                name: name.to_owned(),
            })
        })
    }

    /// Open a unit of work: seal the local registry and the global one.
    ///
    /// Fails with [`TxnError::UnitInProgress`], changing nothing, when a
    /// unit is already open on this coordinator.
    pub fn begin(&self) -> Result<Unit<'_, Begun>, Error> {
        {
            let mut state = self.lock_state();
            if state.is_open() {
                return Err(Error::new(TxnError::UnitInProgress));
            }
            *state = UnitState::Begun;
        }
        self.sources.seal();

        let id = UnitId::next();
        CoordinatorStats::record(&self.stats.units_begun, 1);
        self.observer.on_unit_begun(id);
        Ok(Unit::new(self, id, now_millis()))
    }

    /// Close whatever is open and return to a resting state.
    ///
    /// For recovering after a [`Unit`] was dropped without being closed.
    /// Connections are closed without being committed or rolled back.
    pub async fn force_close(&self) {
        if !self.state().is_open() {
            return;
        }
        tracing::warn!(connections = self.connections.len(), "Force closing open unit");
        self.connections.close_all().await;
        self.sources.unseal_local();
        *self.lock_state() = UnitState::Closed;
    }

    pub(crate) fn step_failed(&self, unit: UnitId, step_index: usize, error: &Error) {
        self.observer.on_step_failed(unit, step_index, error);
    }

    pub(crate) async fn commit_connections(&self, unit: UnitId) -> Result<(), Error> {
        let connections = self.connections.len();
        match self.connections.commit_all().await {
            Ok(()) => {
                *self.lock_state() = UnitState::Committed;
                CoordinatorStats::record(&self.stats.units_committed, 1);
                self.observer.on_committed(unit, connections);
                Ok(())
            }
            Err(err) => {
                if let Some(TxnError::FailToCommit { errors }) = err.reason::<TxnError>() {
                    CoordinatorStats::record(&self.stats.commit_failures, errors.len() as u64);
                    self.observer.on_commit_failed(unit, errors);
                }
                Err(err)
            }
        }
    }

    pub(crate) async fn rollback_connections(&self, unit: UnitId) {
        let rolled_back = self.connections.rollback_all().await;
        *self.lock_state() = UnitState::RolledBack;
        CoordinatorStats::record(&self.stats.units_rolled_back, 1);
        self.observer.on_rolled_back(unit, rolled_back);
    }

    pub(crate) async fn close_unit(&self, unit: UnitId, duration_millis: u64) {
        let connections = self.connections.len();
        self.connections.close_all().await;
        self.sources.unseal_local();
        *self.lock_state() = UnitState::Closed;
        self.observer.on_closed(unit, connections, duration_millis);
    }

    fn lock_state(&self) -> MutexGuard<'_, UnitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
