//! Shared stub collaborators for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast};

use workroot::buffer::{
    BufferError, BufferEvent, BufferFactory, BufferId, BufferParams, BufferState, ConfigRead,
    NotificationSink, SaveEvents, SerializeOptions, TextBuffer, WarningOptions,
};
use workroot::directory::DirectoryHandle;
use workroot::repository::{Repository, RepositoryError, RepositoryProvider};
use workroot::watcher::{EventSink, WatchError, WatchOptions, WatchService, WatcherHandle};

// ---- buffers ---------------------------------------------------------------

/// In-memory stand-in for a document buffer.
pub struct StubBuffer {
    id: BufferId,
    path: Mutex<Option<PathBuf>>,
    modified: AtomicBool,
    retained: AtomicBool,
    destroyed: AtomicBool,
    text: Mutex<String>,
    events: broadcast::Sender<BufferEvent>,
    pub params: BufferParams,
}

impl StubBuffer {
    pub fn new(id: impl Into<String>, path: Option<PathBuf>, params: BufferParams) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            id: BufferId::new(id),
            path: Mutex::new(path),
            modified: AtomicBool::new(false),
            retained: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            text: Mutex::new(String::new()),
            events,
            params,
        })
    }

    pub fn retain(&self) {
        self.retained.store(true, Ordering::SeqCst);
    }

    /// Assign a path, emitting the path-change notification.
    pub fn set_path(&self, new_path: PathBuf) {
        let old_path = self.path.lock().unwrap().replace(new_path.clone());
        let _ = self.events.send(BufferEvent::PathChanged {
            old_path,
            new_path: Some(new_path),
        });
    }

    pub fn save(&self) {
        let path = self.path.lock().unwrap().clone().expect("saving untitled buffer");
        let _ = self.events.send(BufferEvent::WillSave { path: path.clone() });
        let _ = self.events.send(BufferEvent::DidSave { path });
    }

    /// Emit a file-watch error; returns the handled latch.
    pub fn emit_watch_error(&self, event_type: &str) -> Arc<AtomicBool> {
        let handled = Arc::new(AtomicBool::new(false));
        let path = self.path.lock().unwrap().clone().unwrap_or_default();
        let _ = self.events.send(BufferEvent::WatchError {
            event_type: event_type.to_string(),
            path,
            handled: Arc::clone(&handled),
        });
        handled
    }
}

impl TextBuffer for StubBuffer {
    fn id(&self) -> BufferId {
        self.id.clone()
    }

    fn path(&self) -> Option<PathBuf> {
        self.path.lock().unwrap().clone()
    }

    fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    fn is_retained(&self) -> bool {
        self.retained.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(BufferEvent::Destroyed);
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn serialize(&self, options: SerializeOptions) -> BufferState {
        let mut data = serde_json::json!({ "text": self.text.lock().unwrap().clone() });
        if options.teardown {
            data["markers"] = serde_json::json!([]);
            data["history"] = serde_json::json!([]);
        }
        BufferState {
            id: self.id.clone(),
            path: self.path(),
            data,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.events.subscribe()
    }
}

/// Buffer factory backed by the real filesystem.
pub struct StubBufferFactory {
    pub load_count: AtomicUsize,
    pub load_delay: Option<Duration>,
    next_untitled: AtomicUsize,
}

impl StubBufferFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            load_count: AtomicUsize::new(0),
            load_delay: None,
            next_untitled: AtomicUsize::new(0),
        })
    }

    pub fn with_load_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            load_count: AtomicUsize::new(0),
            load_delay: Some(delay),
            next_untitled: AtomicUsize::new(0),
        })
    }

    fn read(&self, path: &Path, params: BufferParams) -> Result<Arc<StubBuffer>, BufferError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let buffer = StubBuffer::new(
                    format!("file-{}", path.display()),
                    Some(path.to_path_buf()),
                    params,
                );
                *buffer.text.lock().unwrap() = text;
                Ok(buffer)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if params.must_exist {
                    Err(BufferError::FileMissing {
                        path: path.to_path_buf(),
                    })
                } else {
                    Ok(StubBuffer::new(
                        format!("file-{}", path.display()),
                        Some(path.to_path_buf()),
                        params,
                    ))
                }
            }
            Err(e) => Err(BufferError::LoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl BufferFactory for StubBufferFactory {
    fn build_empty(&self, params: BufferParams) -> Arc<dyn TextBuffer> {
        let n = self.next_untitled.fetch_add(1, Ordering::SeqCst);
        StubBuffer::new(format!("untitled-{n}"), None, params)
    }

    async fn load(
        &self,
        path: &Path,
        params: BufferParams,
    ) -> Result<Arc<dyn TextBuffer>, BufferError> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        self.read(path, params).map(|b| b as Arc<dyn TextBuffer>)
    }

    fn load_sync(
        &self,
        path: &Path,
        params: BufferParams,
    ) -> Result<Arc<dyn TextBuffer>, BufferError> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        self.read(path, params).map(|b| b as Arc<dyn TextBuffer>)
    }

    async fn deserialize(
        &self,
        state: &BufferState,
        params: BufferParams,
    ) -> Result<Arc<dyn TextBuffer>, BufferError> {
        match &state.path {
            Some(path) => {
                if params.must_exist && !path.exists() {
                    return Err(BufferError::DeserializeFailed {
                        id: state.id.to_string(),
                        reason: format!("missing file {}", path.display()),
                    });
                }
                let buffer = StubBuffer::new(state.id.as_str(), Some(path.clone()), params);
                buffer.retain();
                Ok(buffer)
            }
            None => {
                let buffer = StubBuffer::new(state.id.as_str(), None, params);
                buffer.retain();
                Ok(buffer)
            }
        }
    }
}

// ---- collaborators ---------------------------------------------------------

/// Fixed-value configuration collaborator.
pub struct FixedConfig(pub bool);

impl ConfigRead for FixedConfig {
    fn close_deleted_file_tabs(&self) -> bool {
        self.0
    }
}

/// Records every warning raised through the notification collaborator.
#[derive(Default)]
pub struct CollectingNotifications {
    pub warnings: Mutex<Vec<(String, WarningOptions)>>,
}

impl NotificationSink for CollectingNotifications {
    fn add_warning(&self, message: &str, options: WarningOptions) {
        self.warnings
            .lock()
            .unwrap()
            .push((message.to_string(), options));
    }
}

/// Records save-event forwarding.
#[derive(Default)]
pub struct CollectingSaves {
    pub events: Mutex<Vec<String>>,
}

impl SaveEvents for CollectingSaves {
    fn will_save_path(&self, path: &Path) {
        self.events
            .lock()
            .unwrap()
            .push(format!("will:{}", path.display()));
    }

    fn did_save_path(&self, path: &Path) {
        self.events
            .lock()
            .unwrap()
            .push(format!("did:{}", path.display()));
    }
}

// ---- watching --------------------------------------------------------------

/// One subscription issued by [`RecordingWatchService`].
pub struct WatchRecord {
    pub path: PathBuf,
    pub sink: EventSink,
    pub disposed: Arc<AtomicBool>,
}

pub struct RecordingHandle {
    disposed: Arc<AtomicBool>,
}

impl WatcherHandle for RecordingHandle {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Watch service that records subscriptions and can hold setup in flight
/// until the test releases it.
#[derive(Default)]
pub struct RecordingWatchService {
    pub records: Mutex<Vec<Arc<WatchRecord>>>,
    /// When set, `watch` awaits a notification before completing setup.
    pub gate: Option<Arc<Notify>>,
}

impl RecordingWatchService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }

    pub fn record_for(&self, path: &Path) -> Option<Arc<WatchRecord>> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.path == path)
            .cloned()
    }
}

#[async_trait]
impl WatchService for RecordingWatchService {
    async fn watch(
        &self,
        path: &Path,
        _options: WatchOptions,
        on_events: EventSink,
    ) -> Result<Box<dyn WatcherHandle>, WatchError> {
        let disposed = Arc::new(AtomicBool::new(false));
        self.records.lock().unwrap().push(Arc::new(WatchRecord {
            path: path.to_path_buf(),
            sink: on_events,
            disposed: Arc::clone(&disposed),
        }));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(Box::new(RecordingHandle { disposed }))
    }
}

/// Watch service whose setup always fails.
pub struct FailingWatchService;

#[async_trait]
impl WatchService for FailingWatchService {
    async fn watch(
        &self,
        path: &Path,
        _options: WatchOptions,
        _on_events: EventSink,
    ) -> Result<Box<dyn WatcherHandle>, WatchError> {
        Err(WatchError::PathWatchFailed {
            path: path.to_path_buf(),
            reason: "stub refuses to watch".to_string(),
        })
    }
}

// ---- repositories ----------------------------------------------------------

pub struct StubRepository {
    root: PathBuf,
    destroyed: AtomicBool,
    destroy_tx: broadcast::Sender<()>,
}

impl StubRepository {
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        let (destroy_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            root: root.into(),
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

/// Provider answering from a fixed path → repository table.
#[derive(Default)]
pub struct TableRepositoryProvider {
    pub sync_answers: Mutex<HashMap<PathBuf, Arc<StubRepository>>>,
    pub async_answers: Mutex<HashMap<PathBuf, Arc<StubRepository>>>,
    pub calls: AtomicUsize,
}

impl TableRepositoryProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer_sync(&self, path: impl Into<PathBuf>, repository: Arc<StubRepository>) {
        self.sync_answers.lock().unwrap().insert(path.into(), repository);
    }

    pub fn answer_async(&self, path: impl Into<PathBuf>, repository: Arc<StubRepository>) {
        self.async_answers.lock().unwrap().insert(path.into(), repository);
    }
}

#[async_trait]
impl RepositoryProvider for TableRepositoryProvider {
    async fn repository_for_directory(
        &self,
        directory: Arc<dyn DirectoryHandle>,
    ) -> Result<Option<Arc<dyn Repository>>, RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .async_answers
            .lock()
            .unwrap()
            .get(directory.path())
            .cloned()
            .map(|r| r as Arc<dyn Repository>))
    }

    fn repository_for_directory_sync(
        &self,
        directory: &dyn DirectoryHandle,
    ) -> Option<Arc<dyn Repository>> {
        self.sync_answers
            .lock()
            .unwrap()
            .get(directory.path())
            .cloned()
            .map(|r| r as Arc<dyn Repository>)
    }
}
