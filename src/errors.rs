//! Error carrier and framework failure reasons

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use crate::notify;

/// Payload carried by an [`Error`].
///
/// Implemented for every `Debug + Send + Sync + 'static` type, so an application
/// describes its failures with its own enum and matches on it through
/// [`Error::reason`].
pub trait Reason: Any + fmt::Debug + Send + Sync {
    /// Upcast used for downcasting to the concrete reason type
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> Reason for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A failure: a tagged reason plus an optional lower-level cause.
///
/// Every fallible operation in this crate returns `Result<_, Error>`; `Ok(())`
/// is the no-error value. Constructing an `Error` fires the notification hook
/// once handlers have been fixed (see [`crate::notify`]).
///
/// ```rust,ignore
/// #[derive(Debug)]
/// enum OrderReason { OutOfStock { sku: String } }
///
/// let err = Error::new(OrderReason::OutOfStock { sku: "A-1".into() });
/// match err.reason::<OrderReason>() {
///     Some(OrderReason::OutOfStock { sku }) => println!("no stock for {sku}"),
///     None => {}
/// }
/// ```
#[derive(Clone)]
pub struct Error {
    reason: Arc<dyn Reason>,
    cause: Option<Cause>,
}

impl Error {
    /// Create an error with no cause
    #[track_caller]
    pub fn new<R: Reason>(reason: R) -> Self {
        Self::build(Arc::new(reason), None)
    }

    /// Create an error chained to a lower-level cause
    #[track_caller]
    pub fn with_cause<R, E>(reason: R, cause: E) -> Self
    where
        R: Reason,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::build(Arc::new(reason), Some(Arc::new(cause)))
    }

    #[track_caller]
    fn build(reason: Arc<dyn Reason>, cause: Option<Cause>) -> Self {
        let err = Self { reason, cause };
        notify::notify(&err, Location::caller());
        err
    }

    /// The reason as `R`, if that is its type
    pub fn reason<R: Reason>(&self) -> Option<&R> {
        let reason: &dyn Reason = &*self.reason;
        reason.as_any().downcast_ref::<R>()
    }

    /// Check whether the reason is of type `R`
    pub fn is<R: Reason>(&self) -> bool {
        self.reason::<R>().is_some()
    }

    /// The chained cause, if any
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// The chained cause when it is itself an [`Error`]
    pub fn cause_error(&self) -> Option<&Error> {
        self.cause().and_then(|cause| cause.downcast_ref::<Error>())
    }

    /// Whether both values were propagated from the same construction
    pub fn same_reason_as(&self, other: &Error) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("reason", &self.reason)
            .field("cause", &self.cause)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.reason)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Failure reasons raised by the coordinator itself
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    /// No local or global source is registered under the name
    #[error("no source registered under {name:?}")]
    SourceNotFound {
        /// Requested source name
        name: String,
    },
    /// The source failed to create its connection; the source's error is the cause
    #[error("failed to create connection {name:?}")]
    FailToCreateConnection {
        /// Source name
        name: String,
    },
    /// The cached connection is not of the requested type
    #[error("connection {name:?} is not of the requested type")]
    ConnectionTypeMismatch {
        /// Source name
        name: String,
    },
    /// One or more connections failed to commit
    #[error("{} connection(s) failed to commit", .errors.len())]
    FailToCommit {
        /// Failing connections by name
        errors: HashMap<String, Error>,
    },
    /// One or more units run by [`crate::para`] failed
    #[error("{} unit(s) failed when run in parallel", .errors.len())]
    FailToRunInParallel {
        /// Failing units by position
        errors: HashMap<usize, Error>,
    },
    /// `begin` was called while another unit of work is open on the coordinator
    #[error("a unit of work is already in progress")]
    UnitInProgress,
    /// A group task panicked instead of returning
    #[error("task {label} panicked")]
    TaskPanicked {
        /// Debug rendering of the task label
        label: String,
    },
    /// A logic step panicked; the unit was rolled back and closed
    #[error("logic step panicked: {message}")]
    StepPanicked {
        /// The panic payload, when it was a string
        message: String,
    },
}
