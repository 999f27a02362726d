//! Project notification bus.
//!
//! A typed, multi-topic broadcast bus carrying the notifications external
//! code can subscribe to: root path changes, buffer additions, and
//! filesystem event batches scoped to a still-current root. Subscriptions
//! are plain broadcast receivers; dropping the receiver disposes the
//! subscription.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::buffer::TextBuffer;
use crate::watcher::PathEvent;

/// A batch of filesystem events observed under one root.
#[derive(Debug, Clone)]
pub struct FsEventBatch {
    /// Root path the events were observed under.
    pub root: PathBuf,
    /// Events in arrival order.
    pub events: Vec<PathEvent>,
}

/// Broadcast bus for project notifications.
#[derive(Clone)]
pub struct ProjectBus {
    paths_changed: broadcast::Sender<Vec<String>>,
    buffer_added: broadcast::Sender<Arc<dyn TextBuffer>>,
    fs_events: broadcast::Sender<FsEventBatch>,
}

impl ProjectBus {
    /// Create a bus whose topics each buffer up to `capacity` messages per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (paths_changed, _) = broadcast::channel(capacity);
        let (buffer_added, _) = broadcast::channel(capacity);
        let (fs_events, _) = broadcast::channel(capacity);
        Self {
            paths_changed,
            buffer_added,
            fs_events,
        }
    }

    /// Publish the full current root path list.
    pub fn send_paths_changed(&self, paths: Vec<String>) {
        match self.paths_changed.send(paths) {
            Ok(count) => crate::debug_event!("bus", "paths-changed", "{count} subscribers"),
            Err(_) => crate::debug_event!("bus", "paths-changed dropped", "no subscribers"),
        }
    }

    /// Publish a newly registered buffer.
    pub fn send_buffer_added(&self, buffer: Arc<dyn TextBuffer>) {
        if self.buffer_added.send(buffer).is_err() {
            crate::debug_event!("bus", "buffer-added dropped", "no subscribers");
        }
    }

    /// Publish a filesystem event batch for a still-current root.
    pub fn send_fs_events(&self, batch: FsEventBatch) {
        if self.fs_events.send(batch).is_err() {
            crate::debug_event!("bus", "fs-events dropped", "no subscribers");
        }
    }

    /// Subscribe to root path changes.
    pub fn on_did_change_paths(&self) -> broadcast::Receiver<Vec<String>> {
        self.paths_changed.subscribe()
    }

    /// Subscribe to buffer additions.
    pub fn on_did_add_buffer(&self) -> broadcast::Receiver<Arc<dyn TextBuffer>> {
        self.buffer_added.subscribe()
    }

    /// Subscribe to filesystem event batches.
    pub fn on_filesystem_events(&self) -> broadcast::Receiver<FsEventBatch> {
        self.fs_events.subscribe()
    }
}

impl Default for ProjectBus {
    fn default() -> Self {
        Self::new(64)
    }
}
