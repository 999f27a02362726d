//! Project resource coordination for editor shells.
//!
//! Given a mutable set of root directory paths, this crate maintains, for
//! the lifetime of a session: filesystem change watchers scoped to those
//! roots, lazily-resolved and cached version-control repository handles
//! per root, and a registry of open document buffers deduplicated by path
//! and identity.
//!
//! The central guarantees: no resource leak, no duplicate buffer for the
//! same file, and no event delivered for a root that has already been
//! removed — even when setup of that root's watcher is still in flight at
//! removal time.
//!
//! Text storage, OS event detection, version-control backends, and UI
//! rendering are collaborator contracts, not implementations; see
//! [`buffer::BufferFactory`], [`watcher::WatchService`],
//! [`repository::RepositoryProvider`], and friends.
//!
//! Operations that spawn or await work require a running Tokio runtime.

pub mod buffer;
pub mod config;
pub mod directory;
pub mod events;
pub mod logging;
pub mod project;
pub mod providers;
pub mod repository;
pub mod watcher;

pub use buffer::{
    BufferCollaborators, BufferError, BufferEvent, BufferFactory, BufferId, BufferParams,
    BufferRegistry, BufferState, ConfigRead, LogNotificationSink, NoopSaveEvents,
    NotificationSink, SaveEvents, SerializeOptions, TextBuffer, WarningOptions,
};
pub use config::Settings;
pub use directory::{DirectoryHandle, DirectoryProvider, DirectoryResolver, LocalDirectory};
pub use events::{FsEventBatch, ProjectBus};
pub use project::{
    AddPathOptions, Project, ProjectBuilder, ProjectError, ProjectState, RootEntry,
    SetPathsOptions,
};
pub use providers::{ProviderRegistration, ProviderRegistry};
pub use repository::{
    Repository, RepositoryCache, RepositoryError, RepositoryProvider, RepositoryResolution,
};
pub use watcher::{
    NotifyWatchService, PathEvent, PathEventKind, WatchError, WatchOptions, WatchService,
    WatcherHandle, WatcherRegistry,
};
