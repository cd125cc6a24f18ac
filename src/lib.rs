//! Transactional Resource Coordinator
//!
//! Runs caller-supplied logic against a set of named, lazily created
//! resource connections, then finishes the unit of work with a concurrent,
//! best-effort commit-or-rollback and an unconditional close.
//!
//! Commit is not atomic across resources: when some connections commit and
//! others fail, the committed ones stay committed and the failures are
//! reported together as [`TxnError::FailToCommit`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // 1. Register sources, process-wide or per coordinator
//! let global = Arc::new(GlobalSources::new());
//! global.add("orders", OrdersSource::new(pool));
//! let coordinator = Coordinator::new(global);
//! coordinator.add_local_source("audit", AuditSource::default());
//!
//! // 2. Expose data access to logic through a narrow trait
//! #[async_trait]
//! impl OrdersDax for Coordinator {
//!     async fn place(&self, order: &Order) -> Result<(), Error> {
//!         self.get::<OrdersConn>("orders").await?.insert(order).await
//!     }
//! }
//!
//! // 3. Run logic steps as one unit of work
//! run_txn(&coordinator, &[&ValidateOrder, &PlaceOrder]).await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod errors;
pub mod notify;
mod state;

// === Resources ===
mod connections;
mod source;

// === Execution ===
mod coordinator;
mod group;
mod runner;

// === Observability ===
mod observer;
mod stats;

#[cfg(feature = "test-harness")]
pub mod harness;

// === Re-exports ===

// Errors
pub use errors::{Error, Reason, TxnError};
pub use notify::Occurrence;

// State (typestate)
pub use state::{markers, Begun, Committed, RolledBack, Unit, UnitId, UnitState};

// Resources
pub(crate) use connections::ConnectionManager;
pub use source::{Connection, GlobalSources, Source};

// Execution
pub use coordinator::Coordinator;
pub use group::AsyncGroup;
pub use runner::{para, run_txn, seq, Logic, Runner, Txn};

// Observability
pub use observer::{NoOpObserver, TracingObserver, UnitObserver};
pub use stats::{CoordinatorStats, CoordinatorStatsSnapshot};
