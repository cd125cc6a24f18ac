//! Per-coordinator connection cache and lifecycle fan-out

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use crate::source::{CreatedConn, Sources};
use crate::{AsyncGroup, Connection, Error, TxnError};

type Slot = Arc<OnceCell<CreatedConn>>;

/// Lazily created connections, keyed by source name.
///
/// Each name gets one slot. Concurrent requests for the same uncached name
/// wait on that slot and the source's `create` runs once; requests for other
/// names proceed independently. A failed creation leaves the slot empty.
///
/// Connections that committed are remembered until [`close_all`] so a later
/// [`rollback_all`] leaves them alone.
///
/// [`close_all`]: ConnectionManager::close_all
/// [`rollback_all`]: ConnectionManager::rollback_all
#[derive(Default)]
pub(crate) struct ConnectionManager {
    slots: Mutex<HashMap<String, Slot>>,
    committed: Mutex<HashSet<String>>,
}

impl ConnectionManager {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached connection for `name`, creating it from `sources` on first use.
    ///
    /// The flag is set when this call created the connection.
    pub(crate) async fn get(
        &self,
        name: &str,
        sources: &Sources,
    ) -> Result<(CreatedConn, bool), Error> {
        let slot = Arc::clone(
            self.lock()
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let mut fresh = false;
        let fresh_flag = &mut fresh;
        let created = slot
            .get_or_try_init(move || async move {
                let source = sources.resolve(name).ok_or_else(|| {
                    Error::new(TxnError::SourceNotFound {
                        name: name.to_owned(),
                    })
                })?;
                let created = source.create_erased().await.map_err(|cause| {
                    Error::with_cause(
                        TxnError::FailToCreateConnection {
                            name: name.to_owned(),
                        },
                        cause,
                    )
                })?;
                tracing::debug!(name = %name, "Connection created");
                *fresh_flag = true;
                Ok::<_, Error>(created)
            })
            .await?;

        Ok((created.clone(), fresh))
    }

    /// Names of the connections created so far
    pub fn names(&self) -> Vec<String> {
        self.live().into_iter().map(|(name, _)| name).collect()
    }

    /// Number of connections created so far
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Commit every connection concurrently.
    ///
    /// Fails with [`TxnError::FailToCommit`] holding exactly the connections
    /// whose commit failed. Connections that committed are left committed.
    pub async fn commit_all(&self) -> Result<(), Error> {
        let live = self.live();
        let mut group = AsyncGroup::new();
        for (name, conn) in &live {
            let conn = Arc::clone(conn);
            group.add(name.clone(), async move { conn.commit().await });
        }

        let errors = group.join().await;
        self.committed_names().extend(
            live.into_iter()
                .map(|(name, _)| name)
                .filter(|name| !errors.contains_key(name)),
        );
        if errors.is_empty() {
            return Ok(());
        }
        for (name, err) in &errors {
            tracing::warn!(name = %name, error = %err, "Commit failed");
        }
        Err(Error::new(TxnError::FailToCommit { errors }))
    }

    /// Roll back every connection that has not committed, concurrently, and
    /// wait for all of them. Returns how many were rolled back.
    pub async fn rollback_all(&self) -> usize {
        let committed = self.committed_names().clone();
        let mut group = AsyncGroup::new();
        for (name, conn) in self.live() {
            if committed.contains(&name) {
                continue;
            }
            group.add(name, async move {
                conn.rollback().await;
                Ok(())
            });
        }
        let rolled_back = group.len();
        log_cleanup_failures("rollback", group.join().await);
        rolled_back
    }

    /// Close every connection concurrently, then empty the cache
    pub async fn close_all(&self) {
        let mut group = AsyncGroup::new();
        for (name, conn) in self.live() {
            group.add(name, async move {
                conn.close().await;
                Ok(())
            });
        }
        log_cleanup_failures("close", group.join().await);
        self.lock().clear();
        self.committed_names().clear();
    }

    fn live(&self) -> Vec<(String, Arc<dyn Connection>)> {
        self.lock()
            .iter()
            .filter_map(|(name, slot)| slot.get().map(|c| (name.clone(), Arc::clone(&c.conn))))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn committed_names(&self) -> MutexGuard<'_, HashSet<String>> {
        self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Only a panicking rollback/close lands here
fn log_cleanup_failures(phase: &str, errors: HashMap<String, Error>) {
    for (name, err) in errors {
        tracing::error!(name = %name, phase, error = %err, "Connection cleanup failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::GlobalSources;
    use crate::Source;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Fault {
        CommitRefused,
        Unreachable,
    }

    #[derive(Default)]
    struct Calls {
        created: AtomicUsize,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        closes: AtomicUsize,
    }

    struct MockConn {
        calls: Arc<Calls>,
        fail_commit: bool,
    }

    #[async_trait]
    impl Connection for MockConn {
        async fn commit(&self) -> Result<(), Error> {
            self.calls.commits.fetch_add(1, Ordering::SeqCst);
            if self.fail_commit {
                return Err(Error::new(Fault::CommitRefused));
            }
            Ok(())
        }
        async fn rollback(&self) {
            self.calls.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        async fn close(&self) {
            self.calls.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockSource {
        calls: Arc<Calls>,
        fail_create: bool,
        fail_commit: bool,
    }

    impl MockSource {
        fn new(calls: &Arc<Calls>) -> Self {
            Self {
                calls: Arc::clone(calls),
                fail_create: false,
                fail_commit: false,
            }
        }
    }

    #[async_trait]
    impl Source for MockSource {
        type Conn = MockConn;

        async fn create(&self) -> Result<MockConn, Error> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.calls.created.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(Error::new(Fault::Unreachable));
            }
            Ok(MockConn {
                calls: Arc::clone(&self.calls),
                fail_commit: self.fail_commit,
            })
        }
    }

    fn sources() -> Sources {
        Sources::new(Arc::new(GlobalSources::new()))
    }

    #[tokio::test]
    async fn test_get_returns_cached_connection() {
        let calls = Arc::new(Calls::default());
        let sources = sources();
        sources.add_local("a", MockSource::new(&calls));
        let manager = ConnectionManager::new();

        let first = manager.get("a", &sources).await.expect("first get");
        let second = manager.get("a", &sources).await.expect("second get");

        assert!(first.1);
        assert!(!second.1);
        assert!(Arc::ptr_eq(&first.0.conn, &second.0.conn));
        assert_eq!(calls.created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.names(), vec!["a".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_creates_once() {
        let calls = Arc::new(Calls::default());
        let sources = Arc::new(sources());
        sources.add_local("a", MockSource::new(&calls));
        sources.add_local("b", MockSource::new(&calls));
        let manager = Arc::new(ConnectionManager::new());

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = Arc::clone(&manager);
            let sources = Arc::clone(&sources);
            let name = if i % 2 == 0 { "a" } else { "b" };
            handles.push(tokio::spawn(async move {
                manager.get(name, &sources).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("get");
        }

        assert_eq!(calls.created.load(Ordering::SeqCst), 2);
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_get_unknown_source() {
        let manager = ConnectionManager::new();
        let err = manager
            .get("nope", &sources())
            .await
            .err()
            .expect("should fail");

        match err.reason::<TxnError>() {
            Some(TxnError::SourceNotFound { name }) => assert_eq!(name, "nope"),
            other => panic!("unexpected reason: {other:?}"),
        }
        assert_eq!(manager.len(), 0);
    }

    #[tokio::test]
    async fn test_create_failure_wraps_cause_and_allows_retry() {
        let calls = Arc::new(Calls::default());
        let sources = sources();
        sources.add_local(
            "a",
            MockSource {
                fail_create: true,
                ..MockSource::new(&calls)
            },
        );
        let manager = ConnectionManager::new();

        let err = manager.get("a", &sources).await.err().expect("should fail");
        assert!(matches!(
            err.reason::<TxnError>(),
            Some(TxnError::FailToCreateConnection { name }) if name == "a"
        ));
        let cause = err.cause_error().expect("cause");
        assert_eq!(cause.reason::<Fault>(), Some(&Fault::Unreachable));

        let _ = manager.get("a", &sources).await;
        assert_eq!(calls.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_commit_all_reports_failing_subset() {
        let calls = Arc::new(Calls::default());
        let sources = sources();
        sources.add_local("ok1", MockSource::new(&calls));
        sources.add_local("ok2", MockSource::new(&calls));
        sources.add_local(
            "bad",
            MockSource {
                fail_commit: true,
                ..MockSource::new(&calls)
            },
        );
        let manager = ConnectionManager::new();
        for name in ["ok1", "ok2", "bad"] {
            manager.get(name, &sources).await.expect("get");
        }

        let err = manager.commit_all().await.err().expect("commit should fail");
        let Some(TxnError::FailToCommit { errors }) = err.reason::<TxnError>() else {
            panic!("unexpected reason: {err:?}");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["bad"].reason::<Fault>(), Some(&Fault::CommitRefused));
        assert_eq!(calls.commits.load(Ordering::SeqCst), 3);
        assert_eq!(calls.rollbacks.load(Ordering::SeqCst), 0);

        // Only the connection that failed to commit is rolled back
        assert_eq!(manager.rollback_all().await, 1);
        assert_eq!(calls.rollbacks.load(Ordering::SeqCst), 1);
        manager.close_all().await;
        assert_eq!(calls.closes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_close_all_clears_cache() {
        let calls = Arc::new(Calls::default());
        let sources = sources();
        sources.add_local("a", MockSource::new(&calls));
        sources.add_local("b", MockSource::new(&calls));
        let manager = ConnectionManager::new();
        manager.get("a", &sources).await.expect("get a");
        manager.get("b", &sources).await.expect("get b");

        assert_eq!(manager.rollback_all().await, 2);
        manager.close_all().await;

        assert_eq!(calls.rollbacks.load(Ordering::SeqCst), 2);
        assert_eq!(calls.closes.load(Ordering::SeqCst), 2);
        assert_eq!(manager.len(), 0);

        manager.get("a", &sources).await.expect("recreate");
        assert_eq!(calls.created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_commit_with_no_connections() {
        let manager = ConnectionManager::new();
        assert!(manager.commit_all().await.is_ok());
        assert_eq!(manager.rollback_all().await, 0);
        manager.close_all().await;
    }
}
