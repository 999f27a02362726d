//! Per-root watcher lifecycle.
//!
//! One watch subscription is started per root at add time, keyed by root
//! path. Setup is stored as a shared future so callers can await watcher
//! readiness, and so disposal of a root removed mid-setup can be chained
//! onto the settling future instead of a not-yet-existent subscription.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use super::{EventSink, WatchError, WatchOptions, WatchService, WatcherHandle};

type SharedSetup = Shared<BoxFuture<'static, Result<Arc<dyn WatcherHandle>, Arc<WatchError>>>>;

/// Owns the watch subscriptions for the current root set.
#[derive(Clone, Default)]
pub struct WatcherRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    watchers: Mutex<HashMap<PathBuf, SharedSetup>>,
}

impl WatcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a watch subscription for `root`.
    ///
    /// Setup runs eagerly on a spawned task; its result is retained as an
    /// awaitable handle. A subscription already registered under `root` is
    /// disposed and replaced.
    pub fn watch_root(
        &self,
        service: Arc<dyn WatchService>,
        root: PathBuf,
        options: WatchOptions,
        on_events: EventSink,
    ) {
        let setup: SharedSetup = {
            let root = root.clone();
            async move {
                service
                    .watch(&root, options, on_events)
                    .await
                    .map(Arc::from)
                    .map_err(Arc::new)
            }
        }
        .boxed()
        .shared();

        tokio::spawn({
            let setup = setup.clone();
            async move {
                let _ = setup.await;
            }
        });

        let previous = self.inner.watchers.lock().insert(root, setup);
        if let Some(previous) = previous {
            dispose_when_settled(previous);
        }
    }

    /// Await the watcher for `root` being live.
    ///
    /// Returns `None` when no subscription is registered for `root`.
    /// Setup failures surface here and nowhere else.
    pub async fn watcher_ready(&self, root: &Path) -> Option<Result<(), Arc<WatchError>>> {
        let setup = self.inner.watchers.lock().get(root).cloned()?;
        Some(setup.await.map(|_| ()))
    }

    /// Dispose the subscription for `root`, if any.
    ///
    /// A subscription whose setup is still pending is disposed once the
    /// setup settles.
    pub fn dispose_root(&self, root: &Path) {
        if let Some(setup) = self.inner.watchers.lock().remove(root) {
            crate::debug_event!("watch", "disposing", "{}", root.display());
            dispose_when_settled(setup);
        }
    }

    /// Dispose every subscription.
    pub fn dispose_all(&self) {
        let drained: Vec<SharedSetup> = {
            let mut watchers = self.inner.watchers.lock();
            watchers.drain().map(|(_, setup)| setup).collect()
        };
        for setup in drained {
            dispose_when_settled(setup);
        }
    }

    /// Whether a subscription is registered for `root`.
    pub fn is_watching(&self, root: &Path) -> bool {
        self.inner.watchers.lock().contains_key(root)
    }

    /// Root paths with a registered subscription.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.inner.watchers.lock().keys().cloned().collect()
    }
}

/// Chain disposal onto the setup future: the subscription object may not
/// exist yet, so dispose once setup settles rather than immediately.
fn dispose_when_settled(setup: SharedSetup) {
    tokio::spawn(async move {
        if let Ok(handle) = setup.await {
            handle.dispose();
        }
    });
}
