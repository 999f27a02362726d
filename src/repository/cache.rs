//! Memoized repository resolution.
//!
//! Lookups are keyed by the directory's canonical on-disk path and cached
//! as shared futures, so concurrent callers ride one in-flight resolution.
//! A null resolution evicts its entry (a provider registered later may
//! supply a repository on retry); a non-null resolution follows the
//! repository's own destruction signal to evict when the repository tears
//! itself down.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use super::{Repository, RepositoryError, RepositoryProvider};
use crate::directory::DirectoryHandle;

/// A cached (possibly still in-flight) repository resolution.
pub type RepositoryResolution =
    Shared<BoxFuture<'static, Result<Option<Arc<dyn Repository>>, Arc<RepositoryError>>>>;

/// Per-directory memoization of repository lookups.
#[derive(Clone, Default)]
pub struct RepositoryCache {
    inner: Arc<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: Mutex<HashMap<PathBuf, RepositoryResolution>>,
}

impl RepositoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the repository for `directory`, memoized per canonical
    /// path.
    ///
    /// Providers are queried concurrently; once all settle, the winner is
    /// the first non-null result in provider registration order. The
    /// returned future is stored before resolution completes so concurrent
    /// callers share it.
    pub fn repository_for_directory(
        &self,
        directory: Arc<dyn DirectoryHandle>,
        providers: Vec<Arc<dyn RepositoryProvider>>,
    ) -> RepositoryResolution {
        let key = canonical_key(directory.path());

        let mut entries = self.inner.entries.lock();
        if let Some(cached) = entries.get(&key) {
            return cached.clone();
        }

        let resolution: RepositoryResolution =
            resolve(directory, providers).boxed().shared();
        entries.insert(key.clone(), resolution.clone());
        drop(entries);

        self.watch_settlement(key, resolution.clone());
        resolution
    }

    /// Number of cached entries, including in-flight resolutions.
    pub fn entry_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Evict on null resolution; follow the repository's destruction
    /// signal otherwise. Rejected resolutions stay cached and keep
    /// surfacing the same failure to every caller.
    fn watch_settlement(&self, key: PathBuf, resolution: RepositoryResolution) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match resolution.await {
                Ok(Some(repository)) => {
                    if let Some(mut destroyed) = repository.on_did_destroy() {
                        // The repository may have destroyed itself before
                        // the subscription existed; the flag covers that
                        // window.
                        if !repository.is_destroyed() {
                            let _ = destroyed.recv().await;
                        }
                        if repository.is_destroyed() {
                            inner.entries.lock().remove(&key);
                            crate::debug_event!(
                                "repositories",
                                "evicted",
                                "{} (repository destroyed)",
                                key.display()
                            );
                        }
                    }
                }
                Ok(None) => {
                    inner.entries.lock().remove(&key);
                    crate::debug_event!(
                        "repositories",
                        "evicted",
                        "{} (no provider)",
                        key.display()
                    );
                }
                Err(_) => {}
            }
        });
    }
}

async fn resolve(
    directory: Arc<dyn DirectoryHandle>,
    providers: Vec<Arc<dyn RepositoryProvider>>,
) -> Result<Option<Arc<dyn Repository>>, Arc<RepositoryError>> {
    let queries = providers
        .iter()
        .map(|provider| provider.repository_for_directory(Arc::clone(&directory)));
    let results = futures::future::join_all(queries).await;

    for result in results {
        match result {
            Ok(Some(repository)) => return Ok(Some(repository)),
            Ok(None) => {}
            Err(error) => return Err(Arc::new(error)),
        }
    }
    Ok(None)
}

/// Canonical on-disk path where possible, normalized path otherwise (the
/// directory may not exist yet).
fn canonical_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    use crate::directory::LocalDirectory;

    struct StubRepository {
        root: PathBuf,
        destroyed: AtomicBool,
        destroy_tx: broadcast::Sender<()>,
    }

    impl StubRepository {
        fn new(root: &Path) -> Arc<Self> {
            let (destroy_tx, _) = broadcast::channel(1);
            Arc::new(Self {
                root: root.to_path_buf(),
                destroyed: AtomicBool::new(false),
                destroy_tx,
            })
        }
    }

    impl Repository for StubRepository {
        fn working_directory(&self) -> &Path {
            &self.root
        }

        fn destroy(&self) {
            if !self.destroyed.swap(true, Ordering::SeqCst) {
                let _ = self.destroy_tx.send(());
            }
        }

        fn is_destroyed(&self) -> bool {
            self.destroyed.load(Ordering::SeqCst)
        }

        fn on_did_destroy(&self) -> Option<broadcast::Receiver<()>> {
            Some(self.destroy_tx.subscribe())
        }
    }

    struct StubProvider {
        answer: Option<Arc<dyn Repository>>,
        delay_ms: u64,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn answering(repository: Arc<dyn Repository>, delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                answer: Some(repository),
                delay_ms,
                calls: AtomicUsize::new(0),
            })
        }

        fn empty(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                answer: None,
                delay_ms,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RepositoryProvider for StubProvider {
        async fn repository_for_directory(
            &self,
            _directory: Arc<dyn DirectoryHandle>,
        ) -> Result<Option<Arc<dyn Repository>>, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok(self.answer.clone())
        }
    }

    fn directory(path: &str) -> Arc<dyn DirectoryHandle> {
        Arc::new(LocalDirectory::new(path))
    }

    #[tokio::test]
    async fn test_provider_order_wins_over_completion_order() {
        let cache = RepositoryCache::new();
        let first = StubRepository::new(Path::new("/slow"));
        let second = StubRepository::new(Path::new("/fast"));

        // The first provider answers last; it must still win.
        let slow = StubProvider::answering(first.clone(), 50);
        let fast = StubProvider::answering(second, 0);

        let resolution = cache.repository_for_directory(
            directory("/p"),
            vec![slow as Arc<dyn RepositoryProvider>, fast],
        );
        let resolved = resolution.await.unwrap().unwrap();
        assert_eq!(resolved.working_directory(), Path::new("/slow"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_resolution() {
        let cache = RepositoryCache::new();
        let repository = StubRepository::new(Path::new("/r"));
        let provider = StubProvider::answering(repository, 20);

        let a = cache.repository_for_directory(
            directory("/p"),
            vec![provider.clone() as Arc<dyn RepositoryProvider>],
        );
        let b = cache.repository_for_directory(
            directory("/p"),
            vec![provider.clone() as Arc<dyn RepositoryProvider>],
        );

        let (ra, rb) = tokio::join!(a, b);
        assert!(Arc::ptr_eq(
            &ra.unwrap().unwrap(),
            &rb.unwrap().unwrap()
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_null_resolution_evicts_and_retries() {
        let cache = RepositoryCache::new();
        let empty = StubProvider::empty(0);

        let first = cache
            .repository_for_directory(directory("/p"), vec![empty as Arc<dyn RepositoryProvider>])
            .await;
        assert!(first.unwrap().is_none());

        // Eviction runs on a spawned task; give it a tick.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.entry_count(), 0);

        // A later provider registration gets a fresh lookup.
        let repository = StubRepository::new(Path::new("/r"));
        let provider = StubProvider::answering(repository, 0);
        let second = cache
            .repository_for_directory(
                directory("/p"),
                vec![provider as Arc<dyn RepositoryProvider>],
            )
            .await;
        assert!(second.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_repository_destruction_evicts() {
        let cache = RepositoryCache::new();
        let repository = StubRepository::new(Path::new("/r"));
        let provider = StubProvider::answering(repository.clone(), 0);

        cache
            .repository_for_directory(
                directory("/p"),
                vec![provider as Arc<dyn RepositoryProvider>],
            )
            .await
            .unwrap();
        assert_eq!(cache.entry_count(), 1);

        repository.destroy();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.entry_count(), 0);
    }
}
