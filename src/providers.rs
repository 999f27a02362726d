//! Ordered provider registries with disposable registrations.
//!
//! Directory and repository resolution both consult a dynamically-changing
//! list of providers. The registry keeps providers in
//! most-recently-registered-first order and hands back a token that removes
//! the provider when disposed (or dropped). Resolution walks the
//! registration order current at call time, not at caller-construction
//! time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// An ordered list of providers for one resolution concern.
///
/// `P` is the provider trait object (e.g. `dyn DirectoryProvider`).
pub struct ProviderRegistry<P: ?Sized> {
    inner: Arc<RegistryInner<P>>,
}

struct RegistryInner<P: ?Sized> {
    entries: Mutex<Vec<(u64, Arc<P>)>>,
    next_id: AtomicU64,
}

impl<P: ?Sized> Clone for ProviderRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ?Sized> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ?Sized> ProviderRegistry<P> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a provider at the front of the list.
    ///
    /// The most recent registration wins ties during resolution. The
    /// returned token unregisters the provider when disposed or dropped.
    pub fn register(&self, provider: Arc<P>) -> ProviderRegistration<P> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().insert(0, (id, provider));
        ProviderRegistration {
            registry: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Snapshot of the current providers in resolution order.
    pub fn snapshot(&self) -> Vec<Arc<P>> {
        self.inner
            .entries
            .lock()
            .iter()
            .map(|(_, provider)| Arc::clone(provider))
            .collect()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }
}

/// Disposal token for a registered provider.
///
/// Dropping the token unregisters the provider; `dispose` does the same
/// explicitly. Safe to dispose after the registry itself is gone.
pub struct ProviderRegistration<P: ?Sized> {
    registry: Weak<RegistryInner<P>>,
    id: u64,
}

impl<P: ?Sized> ProviderRegistration<P> {
    /// Unregister the provider now.
    pub fn dispose(self) {
        // Drop does the removal.
    }
}

impl<P: ?Sized> Drop for ProviderRegistration<P> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.entries.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
