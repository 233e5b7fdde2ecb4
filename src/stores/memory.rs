use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::entry::CacheState;
use crate::store::CacheProvider;

/// Thread-safe in-memory provider using a HashMap behind a RwLock.
///
/// This is the default provider of a root scope. It never evicts: entries
/// stay until `delete` or `clear` removes them.
///
/// For bounded caches, use `MokaProvider` instead.
#[derive(Default)]
pub struct MapProvider {
    state: RwLock<HashMap<String, Arc<CacheState>>>,
}

impl MapProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }
}

impl CacheProvider for MapProvider {
    fn name(&self) -> &'static str {
        "map"
    }

    fn get(&self, key: &str) -> Option<Arc<CacheState>> {
        self.state.read().get(key).cloned()
    }

    fn set(&self, key: &str, state: Arc<CacheState>) {
        self.state.write().insert(key.to_string(), state);
    }

    fn has(&self, key: &str) -> bool {
        self.state.read().contains_key(key)
    }

    fn delete(&self, key: &str) {
        self.state.write().remove(key);
    }

    fn clear(&self) {
        self.state.write().clear();
    }

    fn keys(&self) -> Vec<String> {
        self.state.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_delete() {
        let provider = MapProvider::new();

        // Initially empty
        assert!(provider.get("key1").is_none());
        assert!(provider.is_empty());

        // Set an entry
        let entry = Arc::new(CacheState::with_data("value1".to_string()));
        provider.set("key1", entry.clone());

        // Same entry comes back
        let stored = provider.get("key1").unwrap();
        assert!(Arc::ptr_eq(&stored, &entry));
        assert!(provider.has("key1"));

        provider.delete("key1");
        assert!(!provider.has("key1"));
    }

    #[test]
    fn test_keys_and_clear() {
        let provider = MapProvider::new();
        provider.set("a", Arc::new(CacheState::empty()));
        provider.set("b", Arc::new(CacheState::empty()));

        let mut keys = provider.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        // Snapshot iterates the same way twice
        assert_eq!(keys.iter().count(), keys.iter().count());

        provider.clear();
        assert!(provider.keys().is_empty());
    }
}
