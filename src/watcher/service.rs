//! Watch-service contract and the `notify`-backed default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

use super::WatchError;

/// Kind of an observed filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// One observed filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEvent {
    pub kind: PathEventKind,
    pub path: PathBuf,
    /// Previous path for renames, when the backend reports both sides.
    pub old_path: Option<PathBuf>,
}

/// Sink receiving batches of filesystem events.
pub type EventSink = Arc<dyn Fn(Vec<PathEvent>) + Send + Sync>;

/// Tuning for one watch subscription.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Watch the whole tree under the root.
    pub recursive: bool,
    /// Milliseconds a modified file must stay quiet before its event is
    /// delivered. Creations, deletions, and renames are never held back.
    pub debounce_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            debounce_ms: 500,
        }
    }
}

/// A live filesystem subscription scoped to one root.
pub trait WatcherHandle: Send + Sync {
    /// Stop delivery and release the OS subscription. Idempotent.
    fn dispose(&self);

    /// Whether `dispose` has run.
    fn is_disposed(&self) -> bool;
}

/// Filesystem watch service consumed by the lifecycle registry.
#[async_trait]
pub trait WatchService: Send + Sync {
    /// Start watching `path`, delivering event batches to `on_events`
    /// until the returned handle is disposed.
    async fn watch(
        &self,
        path: &Path,
        options: WatchOptions,
        on_events: EventSink,
    ) -> Result<Box<dyn WatcherHandle>, WatchError>;
}

/// Default watch service over `notify`'s recommended backend.
///
/// Each subscription owns its own OS watcher and a pump task that
/// debounces modifications and forwards everything else immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyWatchService;

#[async_trait]
impl WatchService for NotifyWatchService {
    async fn watch(
        &self,
        path: &Path,
        options: WatchOptions,
        on_events: EventSink,
    ) -> Result<Box<dyn WatcherHandle>, WatchError> {
        if !path.is_dir() {
            return Err(WatchError::PathWatchFailed {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(100);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        let mode = if options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(path, mode)
            .map_err(|e| WatchError::PathWatchFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        crate::debug_event!("watch", "started", "{}", path.display());

        let pump = tokio::spawn(pump_events(rx, options.debounce_ms, on_events));
        Ok(Box::new(NotifyWatcherHandle {
            inner: Mutex::new(Some(Subscription {
                _watcher: watcher,
                pump,
            })),
        }))
    }
}

struct Subscription {
    _watcher: notify::RecommendedWatcher,
    pump: JoinHandle<()>,
}

struct NotifyWatcherHandle {
    inner: Mutex<Option<Subscription>>,
}

impl WatcherHandle for NotifyWatcherHandle {
    fn dispose(&self) {
        if let Some(subscription) = self.inner.lock().take() {
            subscription.pump.abort();
        }
    }

    fn is_disposed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

/// Drain the notify channel, debouncing modifications per path and
/// delivering everything else as it arrives.
async fn pump_events(
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    debounce_ms: u64,
    on_events: EventSink,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    let debounce = Duration::from_millis(debounce_ms);

    loop {
        let timeout = sleep(Duration::from_millis(100));
        tokio::pin!(timeout);

        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(Ok(event)) => {
                        let batch = classify(&event, &mut pending);
                        if !batch.is_empty() {
                            on_events(batch);
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("[watch] event stream error: {e}");
                    }
                    None => break,
                }
            }

            _ = &mut timeout => {
                let now = Instant::now();
                let mut ready = Vec::new();
                pending.retain(|path, last_change| {
                    if now.duration_since(*last_change) >= debounce {
                        ready.push(path.clone());
                        false
                    } else {
                        true
                    }
                });
                if !ready.is_empty() {
                    on_events(
                        ready
                            .into_iter()
                            .map(|path| PathEvent {
                                kind: PathEventKind::Modified,
                                path,
                                old_path: None,
                            })
                            .collect(),
                    );
                }
            }
        }
    }
}

/// Convert a notify event into deliverable events, recording
/// modifications into the debounce table instead.
fn classify(event: &Event, pending: &mut HashMap<PathBuf, Instant>) -> Vec<PathEvent> {
    let mut batch = Vec::new();
    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                batch.push(PathEvent {
                    kind: PathEventKind::Created,
                    path: path.clone(),
                    old_path: None,
                });
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                pending.remove(path);
                batch.push(PathEvent {
                    kind: PathEventKind::Deleted,
                    path: path.clone(),
                    old_path: None,
                });
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            pending.remove(&event.paths[0]);
            batch.push(PathEvent {
                kind: PathEventKind::Renamed,
                path: event.paths[1].clone(),
                old_path: Some(event.paths[0].clone()),
            });
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                pending.insert(path.clone(), Instant::now());
            }
        }
        _ => {}
    }
    batch
}
