use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::entry::CacheState;
use crate::stores::memory::MapProvider;

/// A cache provider stores one [`CacheState`] per serialized key.
///
/// Keys are always pre-serialized by the caller; providers never normalise
/// them. Entries are never removed by the engine itself, only through
/// `delete` and `clear`.
pub trait CacheProvider: Send + Sync {
    /// A name for tracing.
    ///
    /// # Example
    /// - "map"
    /// - "moka"
    fn name(&self) -> &'static str;

    /// Return the entry for `key`, `None` when absent.
    fn get(&self, key: &str) -> Option<Arc<CacheState>>;

    /// Store the entry for `key`, replacing any previous one.
    fn set(&self, key: &str, state: Arc<CacheState>);

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn delete(&self, key: &str);

    fn clear(&self);

    /// Snapshot of the stored keys. Iterating it twice yields the same keys.
    fn keys(&self) -> Vec<String>;
}

/// Identifier assigned to a provider when it is wrapped for sharing.
///
/// Scope state is keyed by this id, so every config holding a clone of the
/// same [`SharedProvider`] shares subscriber bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(u64);

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// A cache provider shared by reference across call sites.
#[derive(Clone)]
pub struct SharedProvider {
    id: ProviderId,
    provider: Arc<dyn CacheProvider>,
}

impl SharedProvider {
    pub fn new<P>(provider: P) -> Self
    where
        P: CacheProvider + 'static,
    {
        Self::from_arc(Arc::new(provider))
    }

    pub fn from_arc(provider: Arc<dyn CacheProvider>) -> Self {
        SharedProvider {
            id: ProviderId(NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed)),
            provider,
        }
    }

    pub fn id(&self) -> ProviderId {
        self.id
    }
}

impl Default for SharedProvider {
    fn default() -> Self {
        SharedProvider::new(MapProvider::new())
    }
}

impl Deref for SharedProvider {
    type Target = dyn CacheProvider;

    fn deref(&self) -> &Self::Target {
        self.provider.as_ref()
    }
}

impl fmt::Debug for SharedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedProvider")
            .field("id", &self.id)
            .field("name", &self.provider.name())
            .finish()
    }
}
