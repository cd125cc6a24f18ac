//! Fan-out/fan-in over independent fallible tasks

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;

use tokio::task::JoinSet;

use crate::{Error, TxnError};

/// Runs independent fallible tasks concurrently and reports the failures.
///
/// Tasks are spawned onto the current tokio runtime as soon as they are
/// added, so [`AsyncGroup::add`] must be called from within a runtime. On a
/// multi-threaded runtime the tasks run in parallel.
///
/// There is no cancellation and no timeout: every added task runs to
/// completion even if the group is dropped, and [`AsyncGroup::join`] waits
/// for the slowest one.
///
/// Labels need not be unique. When two tasks with the same label fail, the
/// one that finishes last is the one reported.
pub struct AsyncGroup<L> {
    tasks: JoinSet<(L, Result<(), Error>)>,
    added: usize,
}

impl<L> AsyncGroup<L>
where
    L: Eq + Hash + fmt::Debug + Send + 'static,
{
    /// Create an empty group
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            added: 0,
        }
    }

    /// Start `task` under `label` without waiting for it
    pub fn add<F>(&mut self, label: L, task: F)
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        // Spawned separately so a panic is caught by its own handle and the
        // label survives to be reported.
        let handle = tokio::spawn(task);
        self.tasks.spawn(async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    tracing::error!(label = ?label, error = %join_err, "Group task panicked");
                    Err(Error::new(TxnError::TaskPanicked {
                        label: format!("{label:?}"),
                    }))
                }
            };
            (label, result)
        });
        self.added += 1;
    }

    /// Number of tasks added so far
    pub fn len(&self) -> usize {
        self.added
    }

    /// Whether no task was added
    pub fn is_empty(&self) -> bool {
        self.added == 0
    }

    /// Wait for every task and return the failed ones by label
    pub async fn join(mut self) -> HashMap<L, Error> {
        let mut errors = HashMap::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((label, Err(err))) => {
                    errors.insert(label, err);
                }
                Ok((_, Ok(()))) => {}
                Err(join_err) => {
                    tracing::error!(error = %join_err, "Group task was aborted");
                }
            }
        }
        errors
    }
}

impl<L> Default for AsyncGroup<L>
where
    L: Eq + Hash + fmt::Debug + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
