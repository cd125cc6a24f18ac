//! Resource sources, connections and the registries that hold them

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::Error;

/// A live handle to an external resource.
///
/// A connection is shared by `Arc` between the coordinator's cache, the
/// logic steps that use it and the commit/rollback/close fan-out, so every
/// method takes `&self`; implementors keep mutable state behind their own
/// locks.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Make the work done through this connection durable
    async fn commit(&self) -> Result<(), Error>;

    /// Discard the work done through this connection.
    ///
    /// Best effort: a failure here is the implementor's to log or report.
    async fn rollback(&self);

    /// Release the underlying resource
    async fn close(&self);
}

/// A named factory for one kind of [`Connection`].
///
/// # Example
///
/// ```rust,ignore
/// struct PgSource { pool: PgPool }
///
/// #[async_trait]
/// impl Source for PgSource {
///     type Conn = PgConn;
///
///     async fn create(&self) -> Result<PgConn, Error> {
///         PgConn::begin(&self.pool).await
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Connection type this source creates
    type Conn: Connection;

    /// Create a new connection
    async fn create(&self) -> Result<Self::Conn, Error>;
}

/// A created connection, viewed both as a [`Connection`] and as its concrete type
#[derive(Clone)]
pub(crate) struct CreatedConn {
    pub conn: Arc<dyn Connection>,
    pub any: Arc<dyn Any + Send + Sync>,
}

#[async_trait]
pub(crate) trait ErasedSource: Send + Sync {
    async fn create_erased(&self) -> Result<CreatedConn, Error>;
}

#[async_trait]
impl<S: Source> ErasedSource for S {
    async fn create_erased(&self) -> Result<CreatedConn, Error> {
        let conn = Arc::new(self.create().await?);
        Ok(CreatedConn {
            conn: conn.clone(),
            any: conn,
        })
    }
}

/// Name to source mapping that can be sealed against further additions
#[derive(Default)]
pub(crate) struct SourceRegistry {
    sealed: bool,
    entries: HashMap<String, Arc<dyn ErasedSource>>,
}

impl SourceRegistry {
    /// Create an empty, unsealed registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under `name`, replacing any previous one.
    ///
    /// Does nothing when the registry is sealed.
    pub fn add<S: Source>(&mut self, name: impl Into<String>, source: S) {
        let name = name.into();
        if self.sealed {
            tracing::debug!(name = %name, "Registry sealed, source not added");
            return;
        }
        self.entries.insert(name, Arc::new(source));
    }

    /// Reject further additions
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Accept additions again
    pub fn unseal(&mut self) {
        self.sealed = false;
    }

    /// Whether additions are currently rejected
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether a source is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no source is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<dyn ErasedSource>> {
        self.entries.get(name).cloned()
    }

    fn clear(&mut self) {
        self.sealed = false;
        self.entries.clear();
    }
}

/// The process-wide source registry.
///
/// A host process builds one, registers its shared sources, and hands an
/// `Arc` of it to every [`crate::Coordinator`]. The first coordinator to
/// begin a unit of work seals it; it then stays sealed until [`reset`].
///
/// [`reset`]: GlobalSources::reset
#[derive(Default)]
pub struct GlobalSources {
    inner: RwLock<SourceRegistry>,
}

impl GlobalSources {
    /// Create an empty global registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under `name`; ignored once sealed
    pub fn add<S: Source>(&self, name: impl Into<String>, source: S) {
        self.write().add(name, source);
    }

    /// Reject further additions
    pub fn seal(&self) {
        self.write().seal();
    }

    /// Whether additions are currently rejected
    pub fn is_sealed(&self) -> bool {
        self.read().is_sealed()
    }

    /// Whether a source is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains(name)
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no source is registered
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every source and unseal
    pub fn reset(&self) {
        self.write().clear();
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<dyn ErasedSource>> {
        self.read().lookup(name)
    }

    // Registry data stays consistent across a panicking holder
    fn read(&self) -> RwLockReadGuard<'_, SourceRegistry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SourceRegistry> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A coordinator's local registry paired with the global one
pub(crate) struct Sources {
    local: RwLock<SourceRegistry>,
    global: Arc<GlobalSources>,
}

impl Sources {
    pub fn new(global: Arc<GlobalSources>) -> Self {
        Self {
            local: RwLock::new(SourceRegistry::new()),
            global,
        }
    }

    pub fn add_local<S: Source>(&self, name: impl Into<String>, source: S) {
        self.local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(name, source);
    }

    pub fn local_sealed(&self) -> bool {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_sealed()
    }

    /// Seal the local registry and, as a shared side effect, the global one
    pub fn seal(&self) {
        self.local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .seal();
        self.global.seal();
    }

    pub fn unseal_local(&self) {
        self.local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unseal();
    }

    /// Local source first, then global
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ErasedSource>> {
        let local = self
            .local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(name);
        local.or_else(|| self.global.lookup(name))
    }
}
