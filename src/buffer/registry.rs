//! The buffer registry: deduplication, lifecycle wiring, persistence.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;

use super::{
    BufferError, BufferEvent, BufferFactory, BufferId, BufferParams, BufferState, ConfigRead,
    NotificationSink, SaveEvents, SerializeOptions, TextBuffer, WarningOptions,
};
use crate::directory::normalize_path;
use crate::events::ProjectBus;

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<dyn TextBuffer>, Arc<BufferError>>>>;

/// Hook invoked when a path-less buffer gains a path; the project uses it
/// to seed an empty root set from the buffer's containing directory.
pub type RootAdopter = Box<dyn Fn(PathBuf) + Send + Sync>;

/// Collaborators the registry depends on.
pub struct BufferCollaborators {
    pub factory: Arc<dyn BufferFactory>,
    pub config: Arc<dyn ConfigRead>,
    pub notifications: Arc<dyn NotificationSink>,
    pub saves: Arc<dyn SaveEvents>,
}

/// Creates, deduplicates, and tracks open document buffers.
///
/// At most one live buffer exists per absolute path; concurrent loads for
/// the same path share one in-flight construction. Buffers that failed to
/// deserialize this session are retired by id and path so they are never
/// silently re-created.
#[derive(Clone)]
pub struct BufferRegistry {
    state: Arc<RegistryState>,
}

struct RegistryState {
    weak: Weak<RegistryState>,
    buffers: Mutex<Vec<Arc<dyn TextBuffer>>>,
    pending_loads: Mutex<HashMap<PathBuf, SharedLoad>>,
    retired_ids: Mutex<HashSet<BufferId>>,
    retired_paths: Mutex<HashSet<PathBuf>>,
    root_adopter: Mutex<Option<RootAdopter>>,
    factory: Arc<dyn BufferFactory>,
    config: Arc<dyn ConfigRead>,
    notifications: Arc<dyn NotificationSink>,
    saves: Arc<dyn SaveEvents>,
    bus: ProjectBus,
}

impl BufferRegistry {
    /// Create an empty registry publishing buffer-added events on `bus`.
    pub fn new(collaborators: BufferCollaborators, bus: ProjectBus) -> Self {
        Self {
            state: Arc::new_cyclic(|weak| RegistryState {
                weak: weak.clone(),
                buffers: Mutex::new(Vec::new()),
                pending_loads: Mutex::new(HashMap::new()),
                retired_ids: Mutex::new(HashSet::new()),
                retired_paths: Mutex::new(HashSet::new()),
                root_adopter: Mutex::new(None),
                factory: collaborators.factory,
                config: collaborators.config,
                notifications: collaborators.notifications,
                saves: collaborators.saves,
                bus,
            }),
        }
    }

    /// Install the root-adoption hook.
    pub fn set_root_adopter(&self, adopter: RootAdopter) {
        *self.state.root_adopter.lock() = Some(adopter);
    }

    /// Ordered snapshot of the open buffers.
    pub fn buffers(&self) -> Vec<Arc<dyn TextBuffer>> {
        self.state.buffers.lock().clone()
    }

    /// Live buffer whose path equals `path`, if any.
    pub fn find_buffer_for_path(&self, path: &Path) -> Option<Arc<dyn TextBuffer>> {
        let path = normalize_path(path);
        self.state
            .buffers
            .lock()
            .iter()
            .find(|b| !b.is_destroyed() && b.path().as_deref() == Some(path.as_path()))
            .cloned()
    }

    /// Live buffer with the given id, if any.
    pub fn find_buffer_for_id(&self, id: &BufferId) -> Option<Arc<dyn TextBuffer>> {
        self.state
            .buffers
            .lock()
            .iter()
            .find(|b| !b.is_destroyed() && b.id() == *id)
            .cloned()
    }

    /// Resolve the buffer for `path`, loading it when necessary.
    ///
    /// Concurrent calls for the same path share one load and resolve to
    /// the same buffer instance; the in-flight entry is cleared only after
    /// the buffer is fully registered (success or failure).
    pub async fn buffer_for_path(
        &self,
        path: &Path,
    ) -> Result<Arc<dyn TextBuffer>, Arc<BufferError>> {
        let path = normalize_path(path);
        if let Some(existing) = self.find_buffer_for_path(&path) {
            return Ok(existing);
        }

        let load = {
            let mut pending = self.state.pending_loads.lock();
            match pending.get(&path).cloned() {
                Some(load) => load,
                None => {
                    let state = Arc::clone(&self.state);
                    let key = path.clone();
                    let load: SharedLoad = async move {
                        let params = BufferParams {
                            destroy_on_file_delete: state.config.close_deleted_file_tabs(),
                            must_exist: false,
                        };
                        match state.factory.load(&key, params).await {
                            Ok(buffer) => {
                                state.add_buffer(buffer.clone(), None);
                                Ok(buffer)
                            }
                            Err(error) => Err(Arc::new(error)),
                        }
                    }
                    .boxed()
                    .shared();

                    pending.insert(path.clone(), load.clone());

                    // Clear the in-flight entry once registration finished.
                    tokio::spawn({
                        let load = load.clone();
                        let state = Arc::clone(&self.state);
                        let key = path.clone();
                        async move {
                            let _ = load.await;
                            state.pending_loads.lock().remove(&key);
                        }
                    });

                    load
                }
            }
        };

        load.await
    }

    /// Synchronous find-or-build by path.
    ///
    /// Returns `None` without constructing anything when `path` was
    /// retired this session.
    pub fn buffer_for_path_sync(
        &self,
        path: &Path,
    ) -> Result<Option<Arc<dyn TextBuffer>>, BufferError> {
        let path = normalize_path(path);
        if self.state.retired_paths.lock().contains(&path) {
            return Ok(None);
        }
        if let Some(existing) = self.find_buffer_for_path(&path) {
            return Ok(Some(existing));
        }

        let params = BufferParams {
            destroy_on_file_delete: self.state.config.close_deleted_file_tabs(),
            must_exist: false,
        };
        let buffer = self.state.factory.load_sync(&path, params)?;
        self.state.add_buffer(buffer.clone(), None);
        Ok(Some(buffer))
    }

    /// Synchronous find-or-build by id. A miss builds an untitled buffer.
    ///
    /// Returns `None` without constructing anything when `id` was retired
    /// this session.
    pub fn buffer_for_id_sync(&self, id: &BufferId) -> Option<Arc<dyn TextBuffer>> {
        if self.state.retired_ids.lock().contains(id) {
            return None;
        }
        if let Some(existing) = self.find_buffer_for_id(id) {
            return Some(existing);
        }

        let params = BufferParams {
            destroy_on_file_delete: self.state.config.close_deleted_file_tabs(),
            must_exist: false,
        };
        let buffer = self.state.factory.build_empty(params);
        self.state.add_buffer(buffer.clone(), None);
        Some(buffer)
    }

    /// Append `buffer` to the buffer list and wire its lifecycle.
    pub fn add_buffer(&self, buffer: Arc<dyn TextBuffer>) {
        self.state.add_buffer(buffer, None);
    }

    /// Insert `buffer` at `index` (clamped to the end) and wire its
    /// lifecycle.
    pub fn add_buffer_at_index(&self, buffer: Arc<dyn TextBuffer>, index: usize) {
        self.state.add_buffer(buffer, Some(index));
    }

    /// Remove `buffer` from the registry and destroy it.
    pub fn remove_buffer(&self, buffer: &Arc<dyn TextBuffer>) -> bool {
        let removed = self.state.detach(buffer);
        if removed {
            buffer.destroy();
        }
        removed
    }

    /// Remove the buffer at `index` and destroy it.
    pub fn remove_buffer_at_index(&self, index: usize) -> Option<Arc<dyn TextBuffer>> {
        let buffer = {
            let mut buffers = self.state.buffers.lock();
            if index < buffers.len() {
                Some(buffers.remove(index))
            } else {
                None
            }
        }?;
        buffer.destroy();
        Some(buffer)
    }

    /// Revive persisted buffers.
    ///
    /// Retirement sets are reset first. Every entry is attempted; one that
    /// fails to deserialize is recorded into both retirement sets and
    /// dropped rather than treated as fatal.
    pub async fn deserialize_buffers(&self, states: &[BufferState]) {
        self.state.retired_ids.lock().clear();
        self.state.retired_paths.lock().clear();

        for state in states {
            if self.find_buffer_for_id(&state.id).is_some() {
                continue;
            }
            let params = BufferParams {
                destroy_on_file_delete: self.state.config.close_deleted_file_tabs(),
                must_exist: true,
            };
            match self.state.factory.deserialize(state, params).await {
                Ok(buffer) => self.state.add_buffer(buffer, None),
                Err(error) => {
                    crate::log_event!("buffers", "retired", "{}: {error}", state.id);
                    self.state.retired_ids.lock().insert(state.id.clone());
                    if let Some(path) = &state.path {
                        self.state.retired_paths.lock().insert(normalize_path(path));
                    }
                }
            }
        }
    }

    /// Serialized forms of the retained buffers, in list order.
    ///
    /// Unretained buffers are absent from the output entirely.
    pub fn serialize_buffers(&self, options: SerializeOptions) -> Vec<BufferState> {
        self.state
            .buffers
            .lock()
            .iter()
            .filter(|b| b.is_retained())
            .map(|b| b.serialize(options))
            .collect()
    }

    /// Destroy every buffer that is not retained. Used at session
    /// teardown.
    pub fn destroy_unretained(&self) {
        let unretained: Vec<Arc<dyn TextBuffer>> = self
            .state
            .buffers
            .lock()
            .iter()
            .filter(|b| !b.is_retained())
            .cloned()
            .collect();
        for buffer in unretained {
            self.remove_buffer(&buffer);
        }
    }

    /// Whether `path` was retired this session.
    pub fn is_path_retired(&self, path: &Path) -> bool {
        self.state.retired_paths.lock().contains(&normalize_path(path))
    }

    /// Whether `id` was retired this session.
    pub fn is_id_retired(&self, id: &BufferId) -> bool {
        self.state.retired_ids.lock().contains(id)
    }
}

impl RegistryState {
    fn add_buffer(&self, buffer: Arc<dyn TextBuffer>, index: Option<usize>) {
        {
            let mut buffers = self.buffers.lock();
            match index {
                Some(i) if i < buffers.len() => buffers.insert(i, buffer.clone()),
                _ => buffers.push(buffer.clone()),
            }
        }
        self.wire_buffer(&buffer);
        self.bus.send_buffer_added(buffer);
    }

    /// Remove `buffer` from the list without destroying it.
    fn detach(&self, buffer: &Arc<dyn TextBuffer>) -> bool {
        let mut buffers = self.buffers.lock();
        let before = buffers.len();
        buffers.retain(|b| !Arc::ptr_eq(b, buffer));
        buffers.len() != before
    }

    /// Subscribe to the buffer's lifecycle stream and react:
    /// save events forward to the application collaborator, destruction
    /// removes the buffer, a path-less buffer gaining a path may seed the
    /// root set, and watch errors become dismissable warnings.
    fn wire_buffer(&self, buffer: &Arc<dyn TextBuffer>) {
        let mut events = buffer.subscribe();
        let state = self.weak.clone();
        // Hold the buffer weakly: the list owns it, and the wiring task
        // must not keep a destroyed buffer alive.
        let buffer = Arc::downgrade(buffer);

        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("[buffers] lifecycle stream lagged by {n} events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(state) = state.upgrade() else { break };

                match event {
                    BufferEvent::WillSave { path } => {
                        state.saves.will_save_path(&path);
                    }
                    BufferEvent::DidSave { path } => {
                        state.saves.did_save_path(&path);
                    }
                    BufferEvent::PathChanged { old_path, new_path } => {
                        if old_path.is_none() {
                            if let Some(new_path) = new_path {
                                if let Some(adopter) = state.root_adopter.lock().as_ref() {
                                    adopter(new_path);
                                }
                            }
                        }
                    }
                    BufferEvent::Destroyed => {
                        if let Some(buffer) = buffer.upgrade() {
                            state.detach(&buffer);
                        }
                        break;
                    }
                    BufferEvent::WatchError {
                        event_type,
                        path,
                        handled,
                    } => {
                        handled.store(true, Ordering::SeqCst);
                        state.notifications.add_warning(
                            &format!(
                                "Unable to watch path: `{}`. Make sure you have permissions to \
                                 `{}`.",
                                path.display(),
                                path.display()
                            ),
                            WarningOptions {
                                detail: Some(format!("Watch failure on `{event_type}` event")),
                                dismissable: true,
                            },
                        );
                    }
                }
            }
        });
    }
}
