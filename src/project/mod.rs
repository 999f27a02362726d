//! The project: root set management and resource coordination.
//!
//! The project owns the ordered list of root directories and drives every
//! other resource from it: each root addition starts a watcher and a
//! synchronous repository lookup, each removal disposes them, and the
//! buffer registry is cross-wired so a path-less buffer gaining a path can
//! seed an empty root set.
//!
//! All root mutation is synchronous; the asynchronous resources hanging
//! off a root (watcher setup, repository resolution, buffer loads) are
//! reconciled against the root list at delivery time, so events for a
//! root removed mid-setup are swallowed rather than delivered stale.

mod error;

pub use error::ProjectError;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::buffer::{
    BufferCollaborators, BufferError, BufferFactory, BufferId, BufferRegistry, BufferState,
    ConfigRead, LogNotificationSink, NoopSaveEvents, NotificationSink, SaveEvents,
    SerializeOptions, TextBuffer,
};
use crate::config::Settings;
use crate::directory::{
    DirectoryHandle, DirectoryProvider, DirectoryResolver, has_uri_scheme, normalize_path,
};
use crate::events::{FsEventBatch, ProjectBus};
use crate::providers::{ProviderRegistration, ProviderRegistry};
use crate::repository::{
    Repository, RepositoryCache, RepositoryProvider, RepositoryResolution,
};
use crate::watcher::{
    EventSink, NotifyWatchService, PathEvent, WatchError, WatchOptions, WatchService,
    WatcherRegistry,
};

/// One tracked root: a directory handle paired with its resolved
/// repository. Keeping the pair in a single entry makes the
/// directory/repository correspondence structural.
pub struct RootEntry {
    pub directory: Arc<dyn DirectoryHandle>,
    pub repository: Option<Arc<dyn Repository>>,
}

/// Options for [`Project::add_path`].
#[derive(Debug, Clone, Copy)]
pub struct AddPathOptions {
    /// Fail with [`ProjectError::MissingPath`] instead of silently
    /// no-oping when the path does not exist.
    pub must_exist: bool,
    /// Require the resolved handle's path to equal the input; rejects
    /// files and missing paths without falling back to the parent.
    pub exact: bool,
    /// Emit a paths-changed event after a successful addition.
    pub emit_event: bool,
}

impl Default for AddPathOptions {
    fn default() -> Self {
        Self {
            must_exist: false,
            exact: false,
            emit_event: true,
        }
    }
}

/// Options for [`Project::set_paths`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetPathsOptions {
    /// Fail with [`ProjectError::MissingPaths`] when any path was
    /// missing. The surviving paths have already been applied.
    pub must_exist: bool,
}

/// Persisted project state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectState {
    pub paths: Vec<String>,
    pub buffers: Vec<BufferState>,
}

/// Builder for [`Project`].
pub struct ProjectBuilder {
    buffer_factory: Arc<dyn BufferFactory>,
    watch_service: Arc<dyn WatchService>,
    watch_options: WatchOptions,
    config: Arc<dyn ConfigRead>,
    notifications: Arc<dyn NotificationSink>,
    saves: Arc<dyn SaveEvents>,
}

impl ProjectBuilder {
    fn new(buffer_factory: Arc<dyn BufferFactory>) -> Self {
        Self {
            buffer_factory,
            watch_service: Arc::new(NotifyWatchService),
            watch_options: WatchOptions::default(),
            config: Arc::new(Settings::default()),
            notifications: Arc::new(LogNotificationSink),
            saves: Arc::new(NoopSaveEvents),
        }
    }

    /// Replace the filesystem watch service.
    pub fn watch_service(mut self, service: Arc<dyn WatchService>) -> Self {
        self.watch_service = service;
        self
    }

    /// Set per-root watch tuning.
    pub fn watch_options(mut self, options: WatchOptions) -> Self {
        self.watch_options = options;
        self
    }

    /// Replace the configuration collaborator.
    pub fn config(mut self, config: Arc<dyn ConfigRead>) -> Self {
        self.config = config;
        self
    }

    /// Replace the notification collaborator.
    pub fn notifications(mut self, notifications: Arc<dyn NotificationSink>) -> Self {
        self.notifications = notifications;
        self
    }

    /// Replace the application-level save-event collaborator.
    pub fn save_events(mut self, saves: Arc<dyn SaveEvents>) -> Self {
        self.saves = saves;
        self
    }

    /// Build the project.
    pub fn build(self) -> Project {
        let bus = ProjectBus::default();
        let inner = Arc::new_cyclic(|weak: &Weak<ProjectInner>| {
            let buffers = BufferRegistry::new(
                BufferCollaborators {
                    factory: self.buffer_factory,
                    config: self.config,
                    notifications: self.notifications,
                    saves: self.saves,
                },
                bus.clone(),
            );

            // A path-less buffer gaining a path seeds the root set when it
            // is empty: adopt the containing directory as the sole root.
            let adopter = {
                let weak = weak.clone();
                Box::new(move |path: PathBuf| {
                    let Some(inner) = weak.upgrade() else { return };
                    if !inner.roots.lock().is_empty() {
                        return;
                    }
                    let Some(parent) = path.parent() else { return };
                    let _ = inner.add_path(
                        &parent.to_string_lossy(),
                        AddPathOptions::default(),
                    );
                })
            };
            buffers.set_root_adopter(adopter);

            ProjectInner {
                weak: weak.clone(),
                roots: Mutex::new(Vec::new()),
                resolver: DirectoryResolver::new(),
                repository_providers: ProviderRegistry::new(),
                repository_cache: RepositoryCache::new(),
                watchers: WatcherRegistry::new(),
                watch_service: self.watch_service,
                watch_options: self.watch_options,
                buffers,
                bus: bus.clone(),
            }
        });
        Project { inner }
    }
}

/// The project resource coordinator.
///
/// Construct with [`Project::builder`]. Methods that spawn or await work
/// (watcher setup, repository resolution, buffer loads) require a running
/// Tokio runtime.
#[derive(Clone)]
pub struct Project {
    inner: Arc<ProjectInner>,
}

struct ProjectInner {
    weak: Weak<ProjectInner>,
    roots: Mutex<Vec<RootEntry>>,
    resolver: DirectoryResolver,
    repository_providers: ProviderRegistry<dyn RepositoryProvider>,
    repository_cache: RepositoryCache,
    watchers: WatcherRegistry,
    watch_service: Arc<dyn WatchService>,
    watch_options: WatchOptions,
    buffers: BufferRegistry,
    bus: ProjectBus,
}

impl Project {
    /// Start building a project around the given buffer service.
    pub fn builder(buffer_factory: Arc<dyn BufferFactory>) -> ProjectBuilder {
        ProjectBuilder::new(buffer_factory)
    }

    // ---- roots -----------------------------------------------------------

    /// Current root paths, in order.
    pub fn paths(&self) -> Vec<String> {
        self.inner.paths()
    }

    /// Destructively replace the root set.
    ///
    /// Every current repository is destroyed and every watcher disposed
    /// before the new paths are applied one by one. Paths that fail the
    /// existence check are collected rather than aborting the rest; when
    /// `must_exist` is set and any path failed, the call returns
    /// [`ProjectError::MissingPaths`] after the surviving paths have been
    /// applied.
    pub fn set_paths(
        &self,
        paths: &[impl AsRef<str>],
        options: SetPathsOptions,
    ) -> Result<(), ProjectError> {
        self.inner.set_paths(paths, options)
    }

    /// Add a root. Idempotent: an already-present path is a no-op.
    pub fn add_path(&self, path: &str, options: AddPathOptions) -> Result<(), ProjectError> {
        self.inner.add_path(path, options)
    }

    /// Remove a root by path or URI. Returns whether a removal occurred.
    pub fn remove_path(&self, path: &str) -> bool {
        self.inner.remove_path(path)
    }

    /// Whether some root contains `path`. Pure path relationship, no
    /// existence check.
    pub fn contains(&self, path: &Path) -> bool {
        self.inner
            .roots
            .lock()
            .iter()
            .any(|entry| entry.directory.contains(path))
    }

    /// Resolve `uri_or_path` to an absolute path string.
    ///
    /// Inputs with a scheme prefix pass through unchanged; absolute paths
    /// are normalized and home-expanded; relative paths join the first
    /// root (with multiple roots the first always wins — a known
    /// limitation preserved from the original behavior). `None` when the
    /// input is relative and there are no roots.
    pub fn resolve_path(&self, uri_or_path: &str) -> Option<String> {
        self.inner.resolve_path(uri_or_path)
    }

    /// Split `full_path` into a (root path, relative path) pair.
    ///
    /// Among all roots whose prefix matches, the one yielding the
    /// shortest relative path wins; ties go to root list order. Returns
    /// `(None, full_path)` when no root matches.
    pub fn relativize_path(&self, full_path: &Path) -> (Option<PathBuf>, PathBuf) {
        self.inner.relativize_path(full_path)
    }

    /// Current repositories, paired by position with [`Project::paths`].
    pub fn repositories(&self) -> Vec<Option<Arc<dyn Repository>>> {
        self.inner
            .roots
            .lock()
            .iter()
            .map(|entry| entry.repository.clone())
            .collect()
    }

    // ---- providers -------------------------------------------------------

    /// Register a directory provider. Most recent registration wins.
    pub fn register_directory_provider(
        &self,
        provider: Arc<dyn DirectoryProvider>,
    ) -> ProviderRegistration<dyn DirectoryProvider> {
        self.inner.resolver.register_provider(provider)
    }

    /// Register a repository provider.
    ///
    /// Roots whose repository resolved to `None` are re-checked against
    /// the new provider's synchronous path, so a late registration can
    /// supersede earlier null resolutions.
    pub fn register_repository_provider(
        &self,
        provider: Arc<dyn RepositoryProvider>,
    ) -> ProviderRegistration<dyn RepositoryProvider> {
        let registration = self.inner.repository_providers.register(Arc::clone(&provider));
        let mut roots = self.inner.roots.lock();
        for entry in roots.iter_mut() {
            if entry.repository.is_none() {
                entry.repository = provider.repository_for_directory_sync(entry.directory.as_ref());
            }
        }
        registration
    }

    /// Resolve the repository for `directory` through the memoizing
    /// cache. Providers are consulted in registration order current at
    /// call time.
    pub fn repository_for_directory(
        &self,
        directory: Arc<dyn DirectoryHandle>,
    ) -> RepositoryResolution {
        self.inner
            .repository_cache
            .repository_for_directory(directory, self.inner.repository_providers.snapshot())
    }

    /// Resolve a raw path or URI to a directory handle.
    pub fn directory_for(&self, path_or_uri: &str) -> Arc<dyn DirectoryHandle> {
        self.inner.resolver.directory_for(path_or_uri)
    }

    // ---- watchers --------------------------------------------------------

    /// Await the watcher for `root` being live. Setup failures surface
    /// here. `None` when `root` has no subscription.
    pub async fn watcher_ready(&self, root: &Path) -> Option<Result<(), Arc<WatchError>>> {
        self.inner.watchers.watcher_ready(root).await
    }

    // ---- buffers ---------------------------------------------------------

    /// The buffer registry.
    pub fn buffers(&self) -> &BufferRegistry {
        &self.inner.buffers
    }

    /// Resolve the buffer for `path`, loading it when necessary.
    pub async fn buffer_for_path(
        &self,
        path: &Path,
    ) -> Result<Arc<dyn TextBuffer>, Arc<BufferError>> {
        self.inner.buffers.buffer_for_path(path).await
    }

    /// Synchronous find-or-build by path; `None` when retired.
    pub fn buffer_for_path_sync(
        &self,
        path: &Path,
    ) -> Result<Option<Arc<dyn TextBuffer>>, BufferError> {
        self.inner.buffers.buffer_for_path_sync(path)
    }

    /// Synchronous find-or-build by id; `None` when retired.
    pub fn buffer_for_id_sync(&self, id: &BufferId) -> Option<Arc<dyn TextBuffer>> {
        self.inner.buffers.buffer_for_id_sync(id)
    }

    // ---- persistence -----------------------------------------------------

    /// Snapshot the project: root paths plus the retained buffers.
    pub fn serialize(&self, options: SerializeOptions) -> ProjectState {
        ProjectState {
            paths: self.paths(),
            buffers: self.inner.buffers.serialize_buffers(options),
        }
    }

    /// Restore a persisted project.
    ///
    /// Buffers that fail to reconstruct are retired and dropped; the
    /// persisted root paths are then applied with `must_exist`, so a
    /// vanished root surfaces as [`ProjectError::MissingPaths`] after the
    /// surviving roots have been applied.
    pub async fn deserialize(&self, state: &ProjectState) -> Result<(), ProjectError> {
        self.inner.buffers.deserialize_buffers(&state.buffers).await;
        self.inner
            .set_paths(&state.paths, SetPathsOptions { must_exist: true })
    }

    /// Session teardown: dispose all watchers, destroy all repositories,
    /// destroy every unretained buffer.
    pub fn destroy(&self) {
        let roots: Vec<RootEntry> = std::mem::take(&mut *self.inner.roots.lock());
        for entry in roots {
            if let Some(repository) = entry.repository {
                repository.destroy();
            }
        }
        self.inner.watchers.dispose_all();
        self.inner.buffers.destroy_unretained();
    }

    // ---- notifications ---------------------------------------------------

    /// Subscribe to root path changes. The payload is the full current
    /// path list.
    pub fn on_did_change_paths(&self) -> broadcast::Receiver<Vec<String>> {
        self.inner.bus.on_did_change_paths()
    }

    /// Subscribe to buffer additions.
    pub fn on_did_add_buffer(&self) -> broadcast::Receiver<Arc<dyn TextBuffer>> {
        self.inner.bus.on_did_add_buffer()
    }

    /// Subscribe to filesystem event batches. Batches are only delivered
    /// while their root remains current.
    pub fn on_filesystem_events(&self) -> broadcast::Receiver<FsEventBatch> {
        self.inner.bus.on_filesystem_events()
    }
}

impl ProjectInner {
    fn paths(&self) -> Vec<String> {
        self.roots
            .lock()
            .iter()
            .map(|entry| entry.directory.path().display().to_string())
            .collect()
    }

    fn set_paths(
        &self,
        paths: &[impl AsRef<str>],
        options: SetPathsOptions,
    ) -> Result<(), ProjectError> {
        let old_roots: Vec<RootEntry> = std::mem::take(&mut *self.roots.lock());
        for entry in old_roots {
            if let Some(repository) = entry.repository {
                repository.destroy();
            }
        }
        self.watchers.dispose_all();

        let mut missing = Vec::new();
        for path in paths {
            let add = self.add_path(
                path.as_ref(),
                AddPathOptions {
                    must_exist: true,
                    exact: true,
                    emit_event: false,
                },
            );
            if let Err(ProjectError::MissingPath { path }) = add {
                missing.push(path);
            }
        }

        let current = self.paths();
        if !current.is_empty() {
            self.bus.send_paths_changed(current);
        }

        if options.must_exist && !missing.is_empty() {
            return Err(ProjectError::MissingPaths { paths: missing });
        }
        Ok(())
    }

    fn add_path(&self, path: &str, options: AddPathOptions) -> Result<(), ProjectError> {
        let directory = self.resolver.directory_for(path);

        let requested: PathBuf = if has_uri_scheme(path) {
            PathBuf::from(path)
        } else {
            normalize_path(Path::new(path))
        };
        let accepted =
            (!options.exact || directory.path() == requested) && directory.exists();
        if !accepted {
            if options.must_exist {
                return Err(ProjectError::MissingPath {
                    path: path.to_string(),
                });
            }
            return Ok(());
        }

        let paths_snapshot = {
            let mut roots = self.roots.lock();
            if roots
                .iter()
                .any(|entry| entry.directory.path() == directory.path())
            {
                return Ok(());
            }

            // Fast synchronous provider pass; the resolution cache handles
            // the asynchronous lookups callers issue later.
            let repository = self
                .repository_providers
                .snapshot()
                .iter()
                .find_map(|provider| {
                    provider.repository_for_directory_sync(directory.as_ref())
                });

            roots.push(RootEntry {
                directory: Arc::clone(&directory),
                repository,
            });
            roots
                .iter()
                .map(|entry| entry.directory.path().display().to_string())
                .collect::<Vec<String>>()
        };

        crate::log_event!("project", "root added", "{}", directory.path().display());
        self.start_watcher(&directory);

        if options.emit_event {
            self.bus.send_paths_changed(paths_snapshot);
        }
        Ok(())
    }

    fn remove_path(&self, path: &str) -> bool {
        let removal = {
            let mut roots = self.roots.lock();
            let raw = Path::new(path);
            let index = roots
                .iter()
                .position(|entry| entry.directory.path() == raw)
                .or_else(|| {
                    let normalized = if has_uri_scheme(path) {
                        PathBuf::from(path)
                    } else {
                        normalize_path(raw)
                    };
                    roots
                        .iter()
                        .position(|entry| entry.directory.path() == normalized)
                });

            index.map(|i| {
                let entry = roots.remove(i);
                // An identical repository instance elsewhere in the list
                // must survive the removal of this root.
                let still_referenced = entry.repository.as_ref().is_some_and(|repository| {
                    roots.iter().any(|other| {
                        other
                            .repository
                            .as_ref()
                            .is_some_and(|r| Arc::ptr_eq(r, repository))
                    })
                });
                let paths = roots
                    .iter()
                    .map(|entry| entry.directory.path().display().to_string())
                    .collect::<Vec<String>>();
                (entry, still_referenced, paths)
            })
        };

        let Some((entry, still_referenced, paths)) = removal else {
            return false;
        };

        if let Some(repository) = entry.repository {
            if !still_referenced {
                repository.destroy();
            }
        }
        self.watchers.dispose_root(entry.directory.path());
        crate::log_event!("project", "root removed", "{}", entry.directory.path().display());
        self.bus.send_paths_changed(paths);
        true
    }

    /// Start the watch subscription for a freshly added root. Events are
    /// checked against the root list at delivery time, so a subscription
    /// whose root has since been removed delivers nothing.
    fn start_watcher(&self, directory: &Arc<dyn DirectoryHandle>) {
        let root = directory.path().to_path_buf();
        let weak = self.weak.clone();
        let sink_root = root.clone();
        let sink: EventSink = Arc::new(move |events: Vec<PathEvent>| {
            let Some(inner) = weak.upgrade() else { return };
            let current = inner
                .roots
                .lock()
                .iter()
                .any(|entry| entry.directory.path() == sink_root);
            if !current {
                crate::debug_event!(
                    "project",
                    "swallowed",
                    "events for removed root {}",
                    sink_root.display()
                );
                return;
            }
            inner.bus.send_fs_events(FsEventBatch {
                root: sink_root.clone(),
                events,
            });
        });

        self.watchers.watch_root(
            Arc::clone(&self.watch_service),
            root,
            self.watch_options.clone(),
            sink,
        );
    }

    fn resolve_path(&self, uri_or_path: &str) -> Option<String> {
        if uri_or_path.is_empty() {
            return None;
        }
        if has_uri_scheme(uri_or_path) {
            return Some(uri_or_path.to_string());
        }

        let path = Path::new(uri_or_path);
        if path.is_absolute() || uri_or_path.starts_with('~') {
            return Some(normalize_path(path).display().to_string());
        }

        let roots = self.roots.lock();
        let first = roots.first()?;
        Some(
            normalize_path(&first.directory.path().join(path))
                .display()
                .to_string(),
        )
    }

    fn relativize_path(&self, full_path: &Path) -> (Option<PathBuf>, PathBuf) {
        let roots = self.roots.lock();
        let mut best: Option<(PathBuf, PathBuf)> = None;
        for entry in roots.iter() {
            if let Some(relative) = entry.directory.relativize(full_path) {
                let shorter = match &best {
                    None => true,
                    Some((_, current)) => {
                        relative.as_os_str().len() < current.as_os_str().len()
                    }
                };
                if shorter {
                    best = Some((entry.directory.path().to_path_buf(), relative));
                }
            }
        }
        match best {
            Some((root, relative)) => (Some(root), relative),
            None => (None, full_path.to_path_buf()),
        }
    }
}
