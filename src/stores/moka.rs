use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::CacheState;
use crate::store::CacheProvider;

/// Configuration for MokaProvider.
#[derive(Debug, Clone)]
pub struct MokaProviderConfig {
    /// Maximum number of entries the cache can hold.
    pub max_capacity: u64,

    /// Time to idle: entries are dropped if not read within this duration.
    /// `None` means entries don't expire based on idle time.
    pub time_to_idle: Option<Duration>,
}

impl Default for MokaProviderConfig {
    fn default() -> Self {
        MokaProviderConfig {
            max_capacity: 10_000,
            time_to_idle: None,
        }
    }
}

/// Bounded concurrent provider using Moka.
///
/// Evicted entries disappear from the provider only. Call sites still bound
/// to an evicted key keep their `Arc<CacheState>`; the next call site that
/// binds the key creates a fresh entry and fetches.
pub struct MokaProvider {
    cache: Cache<String, Arc<CacheState>>,
}

impl MokaProvider {
    /// Create a new MokaProvider with the given configuration.
    ///
    /// # Example
    /// ```ignore
    /// let provider = MokaProvider::new(MokaProviderConfig {
    ///     max_capacity: 1_000,
    ///     time_to_idle: Some(Duration::from_secs(600)),
    /// });
    /// ```
    pub fn new(config: MokaProviderConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);

        if let Some(tti) = config.time_to_idle {
            builder = builder.time_to_idle(tti);
        }

        MokaProvider {
            cache: builder.build(),
        }
    }

    /// Approximate entry count (for monitoring/debugging).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl CacheProvider for MokaProvider {
    fn name(&self) -> &'static str {
        "moka"
    }

    fn get(&self, key: &str) -> Option<Arc<CacheState>> {
        self.cache.get(key)
    }

    fn set(&self, key: &str, state: Arc<CacheState>) {
        self.cache.insert(key.to_string(), state);
    }

    fn has(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    fn delete(&self, key: &str) {
        self.cache.invalidate(key);
    }

    fn clear(&self) {
        self.cache.invalidate_all();
    }

    fn keys(&self) -> Vec<String> {
        self.cache.iter().map(|(key, _)| key.as_ref().clone()).collect()
    }
}
