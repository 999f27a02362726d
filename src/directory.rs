//! Directory handles and resolution.
//!
//! A directory handle is an opaque capability over a filesystem location:
//! it can report its normalized path, check existence, and answer pure
//! path-relationship questions. Handles are produced by registered
//! providers (most recent registration wins) with a filesystem-backed
//! fallback, so resolution never fails — existence is checked separately
//! by callers.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::providers::{ProviderRegistration, ProviderRegistry};

/// Opaque capability over a filesystem location.
///
/// Identity is the normalized path; handles are immutable once
/// constructed.
pub trait DirectoryHandle: Send + Sync {
    /// Normalized path of this directory.
    fn path(&self) -> &Path;

    /// Whether the directory currently exists on disk.
    fn exists(&self) -> bool;

    /// Whether `path` lies strictly inside this directory. Pure path
    /// relationship, no disk access.
    fn contains(&self, path: &Path) -> bool;

    /// Relative remainder of `path` under this directory, or `None` when
    /// `path` is outside it.
    fn relativize(&self, path: &Path) -> Option<PathBuf>;
}

/// Default filesystem-backed directory handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    /// Create a handle for `path`, normalizing it first.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: normalize_path(&path.into()),
        }
    }
}

impl DirectoryHandle for LocalDirectory {
    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.is_dir()
    }

    fn contains(&self, path: &Path) -> bool {
        let normalized = normalize_path(path);
        normalized != self.path && normalized.starts_with(&self.path)
    }

    fn relativize(&self, path: &Path) -> Option<PathBuf> {
        normalize_path(path)
            .strip_prefix(&self.path)
            .ok()
            .map(PathBuf::from)
    }
}

/// Supplies directory handles for URIs this provider understands.
///
/// Providers are consulted synchronously; returning `None` passes the URI
/// on to older registrations and finally the filesystem fallback.
pub trait DirectoryProvider: Send + Sync {
    /// Produce a handle for `uri`, or `None` when this provider does not
    /// claim it.
    fn directory_for_uri_sync(&self, uri: &str) -> Option<Arc<dyn DirectoryHandle>>;
}

/// Resolves raw paths and URIs to directory handles.
#[derive(Clone, Default)]
pub struct DirectoryResolver {
    providers: ProviderRegistry<dyn DirectoryProvider>,
}

impl DirectoryResolver {
    /// Create a resolver with no providers registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Later registrations win ties; the returned
    /// token unregisters on disposal.
    pub fn register_provider(
        &self,
        provider: Arc<dyn DirectoryProvider>,
    ) -> ProviderRegistration<dyn DirectoryProvider> {
        self.providers.register(provider)
    }

    /// Resolve `path_or_uri` to a directory handle.
    ///
    /// Walks providers in most-recently-registered-first order; the first
    /// synchronous answer wins. Falls back to a filesystem-backed handle.
    /// A path naming an existing file resolves to its parent directory.
    pub fn directory_for(&self, path_or_uri: &str) -> Arc<dyn DirectoryHandle> {
        for provider in self.providers.snapshot() {
            if let Some(handle) = provider.directory_for_uri_sync(path_or_uri) {
                return handle;
            }
        }

        let path = normalize_path(Path::new(path_or_uri));
        if path.is_file() {
            if let Some(parent) = path.parent() {
                return Arc::new(LocalDirectory::new(parent));
            }
        }
        Arc::new(LocalDirectory::new(path))
    }
}

/// Lexically normalize a path: strip `.` components, resolve `..` where
/// possible, drop trailing separators, and expand a leading `~`.
///
/// No disk access; symlinks are left alone.
pub fn normalize_path(path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let mut normalized = PathBuf::new();
    for component in expanded.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !pop_normal(&mut normalized) {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

/// Pop the last component if it is a normal one. Leaves roots and leading
/// `..` runs intact so `/..` stays `/` and `../..` accumulates.
fn pop_normal(path: &mut PathBuf) -> bool {
    match path.components().next_back() {
        Some(Component::Normal(_)) => {}
        Some(Component::RootDir) | Some(Component::Prefix(_)) => return true,
        _ => return false,
    }
    path.pop()
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Whether `input` carries a URI scheme prefix (`scheme://...`).
pub(crate) fn has_uri_scheme(input: &str) -> bool {
    match input.split_once("://") {
        Some((scheme, _)) if !scheme.is_empty() => {
            let mut chars = scheme.chars();
            chars
                .next()
                .is_some_and(|first| first.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_dot_components() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c/")),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn test_normalize_keeps_root_on_excess_parent() {
        assert_eq!(normalize_path(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn test_normalize_relative_parent_runs() {
        assert_eq!(normalize_path(Path::new("../../x")), PathBuf::from("../../x"));
        assert_eq!(normalize_path(Path::new("a/../..")), PathBuf::from(".."));
    }

    #[test]
    fn test_normalize_empty_becomes_dot() {
        assert_eq!(normalize_path(Path::new("a/..")), PathBuf::from("."));
    }

    #[test]
    fn test_expand_home_prefix() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(normalize_path(Path::new("~/x")), home.join("x"));
        }
    }

    #[test]
    fn test_contains_is_strict() {
        let dir = LocalDirectory::new("/a/b");
        assert!(dir.contains(Path::new("/a/b/c.txt")));
        assert!(!dir.contains(Path::new("/a/b")));
        assert!(!dir.contains(Path::new("/a/other")));
    }

    #[test]
    fn test_relativize() {
        let dir = LocalDirectory::new("/a/b");
        assert_eq!(
            dir.relativize(Path::new("/a/b/c/d.txt")),
            Some(PathBuf::from("c/d.txt"))
        );
        assert_eq!(dir.relativize(Path::new("/a/b")), Some(PathBuf::new()));
        assert_eq!(dir.relativize(Path::new("/elsewhere")), None);
    }

    #[test]
    fn test_uri_scheme_detection() {
        assert!(has_uri_scheme("remote://host/project"));
        assert!(has_uri_scheme("atom+ssh://x"));
        assert!(!has_uri_scheme("/plain/path"));
        assert!(!has_uri_scheme("c:\\windows\\path"));
        assert!(!has_uri_scheme("://missing"));
    }

    #[test]
    fn test_resolver_falls_back_to_filesystem() {
        let resolver = DirectoryResolver::new();
        let handle = resolver.directory_for("/no/providers/registered");
        assert_eq!(handle.path(), Path::new("/no/providers/registered"));
    }

    #[test]
    fn test_resolver_surfaces_parent_for_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("notes.txt");
        std::fs::write(&file, "x").unwrap();

        let resolver = DirectoryResolver::new();
        let handle = resolver.directory_for(&file.to_string_lossy());
        assert_eq!(handle.path(), normalize_path(temp.path()));
    }

    struct ClaimAll(PathBuf);

    impl DirectoryProvider for ClaimAll {
        fn directory_for_uri_sync(&self, _uri: &str) -> Option<Arc<dyn DirectoryHandle>> {
            Some(Arc::new(LocalDirectory::new(self.0.clone())))
        }
    }

    #[test]
    fn test_most_recent_provider_wins() {
        let resolver = DirectoryResolver::new();
        let _old = resolver.register_provider(Arc::new(ClaimAll(PathBuf::from("/old"))));
        let _new = resolver.register_provider(Arc::new(ClaimAll(PathBuf::from("/new"))));

        assert_eq!(resolver.directory_for("anything").path(), Path::new("/new"));
    }

    #[test]
    fn test_disposed_provider_is_skipped() {
        let resolver = DirectoryResolver::new();
        let registration = resolver.register_provider(Arc::new(ClaimAll(PathBuf::from("/p"))));
        registration.dispose();

        assert_eq!(
            resolver.directory_for("/fallback").path(),
            Path::new("/fallback")
        );
    }
}
