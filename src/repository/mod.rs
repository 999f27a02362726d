//! Repository handles, providers, and the resolution cache.
//!
//! A repository handle is the resolved version-control binding for a
//! directory, or `None` when no registered provider supplies one. The
//! concrete backend mechanics live behind [`Repository`] and
//! [`RepositoryProvider`]; this module only coordinates resolution and
//! caching.

mod cache;

pub use cache::{RepositoryCache, RepositoryResolution};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::directory::DirectoryHandle;

/// Errors surfaced by repository providers during resolution.
///
/// Provider failures are not caught by the cache; they propagate to every
/// caller sharing the resolution.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Repository provider failed for {path}: {reason}")]
    Provider { path: String, reason: String },
}

/// Resolved version-control binding for a directory.
pub trait Repository: Send + Sync {
    /// Working directory this repository tracks.
    fn working_directory(&self) -> &Path;

    /// Tear the repository down and release backend resources. Idempotent.
    fn destroy(&self);

    /// Whether `destroy` has run.
    fn is_destroyed(&self) -> bool;

    /// Destruction notification, when the implementation supports one.
    ///
    /// Implementations without a signal return `None`; the cache then
    /// keeps the entry until a null resolution evicts it.
    fn on_did_destroy(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

/// Supplies repositories for directories this provider understands.
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// Resolve a repository for `directory`, or `None` when this provider
    /// has nothing for it.
    async fn repository_for_directory(
        &self,
        directory: Arc<dyn DirectoryHandle>,
    ) -> Result<Option<Arc<dyn Repository>>, RepositoryError>;

    /// Fast same-thread lookup used on root addition. Providers that need
    /// to suspend keep the default and answer only asynchronously.
    fn repository_for_directory_sync(
        &self,
        directory: &dyn DirectoryHandle,
    ) -> Option<Arc<dyn Repository>> {
        let _ = directory;
        None
    }
}
