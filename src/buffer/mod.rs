//! Document-buffer contracts and the buffer registry.
//!
//! The buffer's internal text storage lives behind [`TextBuffer`] and
//! [`BufferFactory`]; this module owns identity, deduplication, lifecycle
//! wiring, and persistence bookkeeping for the set of open buffers.

mod error;
mod registry;

pub use error::BufferError;
pub use registry::{BufferCollaborators, BufferRegistry, RootAdopter};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Stable identifier for a document buffer, preserved across
/// serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(String);

impl BufferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted form of one buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferState {
    pub id: BufferId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Implementation-defined payload: text, and for teardown snapshots
    /// marker layers and edit history.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Lifecycle notifications emitted by a buffer.
#[derive(Debug, Clone)]
pub enum BufferEvent {
    /// A save is starting.
    WillSave { path: PathBuf },
    /// A save finished.
    DidSave { path: PathBuf },
    /// The buffer's path changed; `None` means untitled.
    PathChanged {
        old_path: Option<PathBuf>,
        new_path: Option<PathBuf>,
    },
    /// The buffer was destroyed.
    Destroyed,
    /// The buffer's own file watch failed. Consumers set `handled`;
    /// unhandled errors escalate in the buffer implementation.
    WatchError {
        event_type: String,
        path: PathBuf,
        handled: Arc<AtomicBool>,
    },
}

/// Options for serializing buffers and project state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializeOptions {
    /// Teardown snapshots additionally persist marker layers and edit
    /// history.
    pub teardown: bool,
}

/// Construction parameters passed to the buffer service.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferParams {
    /// Destroy the buffer when its backing file is deleted on disk.
    pub destroy_on_file_delete: bool,
    /// Fail the load when the backing file does not exist.
    pub must_exist: bool,
}

/// One open document.
///
/// Exclusively owned by the registry until destroyed. Retained buffers
/// survive session teardown; keeping them alive afterwards is the
/// caller's responsibility.
pub trait TextBuffer: Send + Sync {
    fn id(&self) -> BufferId;

    /// Absolute path, or `None` for an untitled buffer.
    fn path(&self) -> Option<PathBuf>;

    fn is_modified(&self) -> bool;

    fn is_retained(&self) -> bool;

    /// Tear the buffer down. Idempotent; emits [`BufferEvent::Destroyed`].
    fn destroy(&self);

    fn is_destroyed(&self) -> bool;

    fn serialize(&self, options: SerializeOptions) -> BufferState;

    /// Subscribe to this buffer's lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<BufferEvent>;
}

/// Document-buffer service: constructs, loads, and revives buffers.
#[async_trait]
pub trait BufferFactory: Send + Sync {
    /// Construct an empty (untitled) buffer.
    fn build_empty(&self, params: BufferParams) -> Arc<dyn TextBuffer>;

    /// Load a buffer from disk.
    async fn load(
        &self,
        path: &Path,
        params: BufferParams,
    ) -> Result<Arc<dyn TextBuffer>, BufferError>;

    /// Synchronous load used by tests and deserialization helpers.
    fn load_sync(
        &self,
        path: &Path,
        params: BufferParams,
    ) -> Result<Arc<dyn TextBuffer>, BufferError>;

    /// Revive a buffer from persisted state.
    async fn deserialize(
        &self,
        state: &BufferState,
        params: BufferParams,
    ) -> Result<Arc<dyn TextBuffer>, BufferError>;
}

/// Configuration collaborator: a single policy read, evaluated at buffer
/// construction time and not cached thereafter.
pub trait ConfigRead: Send + Sync {
    /// Whether buffers should close when their backing file is deleted.
    fn close_deleted_file_tabs(&self) -> bool;
}

/// Options for a user-facing warning.
#[derive(Debug, Clone, Default)]
pub struct WarningOptions {
    pub detail: Option<String>,
    pub dismissable: bool,
}

/// Notification collaborator for user-facing warnings.
pub trait NotificationSink: Send + Sync {
    fn add_warning(&self, message: &str, options: WarningOptions);
}

/// Notification sink that routes warnings into the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn add_warning(&self, message: &str, options: WarningOptions) {
        match options.detail {
            Some(detail) => tracing::warn!("{message}: {detail}"),
            None => tracing::warn!("{message}"),
        }
    }
}

/// Application-level save-event collaborator.
pub trait SaveEvents: Send + Sync {
    fn will_save_path(&self, path: &Path);
    fn did_save_path(&self, path: &Path);
}

/// Save-event sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSaveEvents;

impl SaveEvents for NoopSaveEvents {
    fn will_save_path(&self, _path: &Path) {}
    fn did_save_path(&self, _path: &Path) {}
}
