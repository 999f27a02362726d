//! Filesystem watching for project roots.
//!
//! This module provides the watch-service contract, a `notify`-backed
//! default implementation, and the per-root lifecycle registry.
//!
//! # Architecture
//!
//! ```text
//! WatcherRegistry
//!   - one subscription per root, keyed by root path
//!   - setup stored as an awaitable shared future
//!   - disposal chained onto setups still in flight
//!         |
//!    WatchService (trait)
//!         |
//!    NotifyWatchService
//!   - notify::RecommendedWatcher per root
//!   - channel pump with modification debouncing
//! ```

mod error;
mod lifecycle;
mod service;

pub use error::WatchError;
pub use lifecycle::WatcherRegistry;
pub use service::{
    EventSink, NotifyWatchService, PathEvent, PathEventKind, WatchOptions, WatchService,
    WatcherHandle,
};
