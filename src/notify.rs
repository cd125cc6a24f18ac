//! Error notification hook
//!
//! Handlers are registered while the process configures itself and then
//! frozen with [`fix_handlers`]. Until then, constructing an [`Error`] notifies
//! no one; afterwards every construction runs the sync handlers in
//! registration order and launches each async handler in the background.
//!
//! The hook is process-wide: error construction takes no context argument.

use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::Error;

/// Where and when an [`Error`] was constructed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Occurrence {
    /// Construction time (millis since UNIX epoch, UTC)
    pub occurred_at_millis: u64,
    /// Source file of the constructing call, empty if unknown
    pub file: &'static str,
    /// Source line of the constructing call, 0 if unknown
    pub line: u32,
}

type Handler = Arc<dyn Fn(&Error, &Occurrence) + Send + Sync + 'static>;

struct Handlers {
    sync: Vec<Handler>,
    background: Vec<Handler>,
}

static HANDLERS: RwLock<Handlers> = RwLock::new(Handlers {
    sync: Vec::new(),
    background: Vec::new(),
});
static FIXED: AtomicBool = AtomicBool::new(false);

/// Register a handler that runs on the constructing thread.
///
/// Ignored once handlers are fixed.
pub fn add_sync_handler<F>(handler: F)
where
    F: Fn(&Error, &Occurrence) + Send + Sync + 'static,
{
    let mut handlers = HANDLERS.write().unwrap_or_else(PoisonError::into_inner);
    if FIXED.load(Ordering::Acquire) {
        return;
    }
    handlers.sync.push(Arc::new(handler));
}

/// Register a handler that runs in the background and is never awaited.
///
/// Ignored once handlers are fixed.
pub fn add_async_handler<F>(handler: F)
where
    F: Fn(&Error, &Occurrence) + Send + Sync + 'static,
{
    let mut handlers = HANDLERS.write().unwrap_or_else(PoisonError::into_inner);
    if FIXED.load(Ordering::Acquire) {
        return;
    }
    handlers.background.push(Arc::new(handler));
}

/// Freeze the handler lists and start notifying
pub fn fix_handlers() {
    let _handlers = HANDLERS.write().unwrap_or_else(PoisonError::into_inner);
    FIXED.store(true, Ordering::Release);
}

/// Whether [`fix_handlers`] has been called
pub fn handlers_fixed() -> bool {
    FIXED.load(Ordering::Acquire)
}

pub(crate) fn notify(err: &Error, location: &'static Location<'static>) {
    if !FIXED.load(Ordering::Acquire) {
        return;
    }

    let occurrence = Occurrence {
        occurred_at_millis: now_millis(),
        file: location.file(),
        line: location.line(),
    };

    // Copied out so a handler that builds an Error does not re-enter the lock
    let (sync, background) = {
        let handlers = HANDLERS.read().unwrap_or_else(PoisonError::into_inner);
        (handlers.sync.clone(), handlers.background.clone())
    };

    for handler in &sync {
        handler(err, &occurrence);
    }

    for handler in background {
        let err = err.clone();
        let occurrence = occurrence.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || handler(&err, &occurrence));
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("txn-notify".into())
                    .spawn(move || handler(&err, &occurrence));
                if let Err(e) = spawned {
                    tracing::warn!(error = %e, "Failed to launch async error handler");
                }
            }
        }
    }
}

/// Current time in milliseconds since UNIX epoch
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
