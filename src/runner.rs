//! Running logic steps as units of work, and composing units

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::{AsyncGroup, Coordinator, Error, TxnError, UnitId};

/// One step of business logic.
///
/// `D` is the view the step needs, typically a trait of data-access methods
/// the application implements for [`Coordinator`]. A step must not keep the
/// view beyond the call.
///
/// # Example
///
/// ```rust,ignore
/// #[async_trait]
/// trait StockDax {
///     async fn reserve(&self, sku: &str, qty: u32) -> Result<(), Error>;
/// }
///
/// struct ReserveStock;
///
/// #[async_trait]
/// impl<D: StockDax + Sync> Logic<D> for ReserveStock {
///     async fn run(&self, data: &D) -> Result<(), Error> {
///         data.reserve("A-1", 2).await
///     }
/// }
/// ```
#[async_trait]
pub trait Logic<D: Sync>: Send + Sync {
    /// Execute the step against `data`
    async fn run(&self, data: &D) -> Result<(), Error>;
}

/// A complete, self-contained piece of work that [`seq`] and [`para`] compose
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run to completion
    async fn run(&self) -> Result<(), Error>;
}

/// Run `logics` in order as one unit of work on `coordinator`.
///
/// Stops at the first failing step. When every step succeeds the
/// connections are committed; when a step or the commit fails they are
/// rolled back. Either way they are then closed and the local registry is
/// unsealed. Returns the step's error, else the commit error.
///
/// A panicking step is treated as a failed one and reported as
/// [`TxnError::StepPanicked`].
pub async fn run_txn(
    coordinator: &Coordinator,
    logics: &[&dyn Logic<Coordinator>],
) -> Result<(), Error> {
    let unit = coordinator.begin()?;

    let steps = AssertUnwindSafe(run_logics(coordinator, unit.id(), logics))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(unit_id = %unit.id(), panic = %message, "Logic step panicked");
            Err(Error::new(TxnError::StepPanicked { message }))
        });

    if let Err(err) = steps {
        unit.rollback().await.close().await;
        return Err(err);
    }

    match unit.commit().await {
        Ok(committed) => {
            committed.close().await;
            Ok(())
        }
        Err((err, unit)) => {
            unit.rollback().await.close().await;
            Err(err)
        }
    }
}

async fn run_logics(
    coordinator: &Coordinator,
    unit: UnitId,
    logics: &[&dyn Logic<Coordinator>],
) -> Result<(), Error> {
    for (index, logic) in logics.iter().enumerate() {
        if let Err(err) = logic.run(coordinator).await {
            coordinator.step_failed(unit, index, &err);
            return Err(err);
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// A coordinator and its logic steps, packaged as a [`Runner`]
pub struct Txn {
    coordinator: Arc<Coordinator>,
    logics: Vec<Box<dyn Logic<Coordinator>>>,
}

impl Txn {
    /// Start an empty transaction on `coordinator`
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            logics: Vec::new(),
        }
    }

    /// Append a logic step
    pub fn logic<L>(mut self, logic: L) -> Self
    where
        L: Logic<Coordinator> + 'static,
    {
        self.logics.push(Box::new(logic));
        self
    }

    /// The coordinator this transaction runs on
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }
}

#[async_trait]
impl Runner for Txn {
    async fn run(&self) -> Result<(), Error> {
        let logics: Vec<&dyn Logic<Coordinator>> =
            self.logics.iter().map(|l| &**l).collect();
        run_txn(&self.coordinator, &logics).await
    }
}

/// Run `runners` one after another, stopping at the first failure
pub async fn seq(runners: &[&dyn Runner]) -> Result<(), Error> {
    for runner in runners {
        runner.run().await?;
    }
    Ok(())
}

/// Run `runners` concurrently and wait for all of them.
///
/// Every runner completes regardless of the others. Failures are reported
/// as [`TxnError::FailToRunInParallel`] keyed by position in `runners`.
pub async fn para(runners: Vec<Arc<dyn Runner>>) -> Result<(), Error> {
    let mut group = AsyncGroup::new();
    for (index, runner) in runners.into_iter().enumerate() {
        group.add(index, async move { runner.run().await });
    }

    let errors = group.join().await;
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::new(TxnError::FailToRunInParallel { errors }))
    }
}
