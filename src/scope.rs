//! Per-provider subscriber bookkeeping.
//!
//! Every call site bound to a key registers a revalidate callback under that
//! key. Broadcast revalidation (after `mutate`) calls the first one only: the
//! cache entry is shared, so one fetch landing updates every subscriber.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use crate::store::ProviderId;

/// Revalidate callback. The argument is the `dedup` flag of the fetch.
pub type RevalidateCallback = Arc<dyn Fn(bool) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle of one registration, used to unsubscribe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Subscriber bookkeeping for one cache provider.
#[derive(Default)]
pub struct ScopeState {
    revalidate_cache: Mutex<HashMap<String, Vec<(SubscriberId, RevalidateCallback)>>>,
    next_id: AtomicU64,
}

impl ScopeState {
    /// Register `callback` under `key`, after any existing subscriber.
    pub fn subscribe(&self, key: &str, callback: RevalidateCallback) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.revalidate_cache
            .lock()
            .entry(key.to_string())
            .or_default()
            .push((id, callback));
        trace!(key, "subscribed");
        id
    }

    /// Remove one registration. Unknown ids are ignored.
    pub fn unsubscribe(&self, key: &str, id: SubscriberId) {
        let mut cache = self.revalidate_cache.lock();
        if let Some(callbacks) = cache.get_mut(key) {
            callbacks.retain(|(current, _)| *current != id);
            if callbacks.is_empty() {
                cache.remove(key);
            }
        }
        trace!(key, "unsubscribed");
    }

    /// The earliest registered callback still subscribed to `key`.
    pub fn first_subscriber(&self, key: &str) -> Option<RevalidateCallback> {
        self.revalidate_cache
            .lock()
            .get(key)
            .and_then(|callbacks| callbacks.first())
            .map(|(_, callback)| callback.clone())
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.revalidate_cache.lock().get(key).map_or(0, Vec::len)
    }

    /// Keys with at least one subscriber.
    pub fn keys(&self) -> Vec<String> {
        self.revalidate_cache.lock().keys().cloned().collect()
    }
}

/// Registry of [`ScopeState`]s keyed by provider identity.
///
/// The registry only holds weak references. Scopes and bindings using a
/// provider hold the state strongly, so it lives exactly as long as someone
/// uses the provider and every lookup in between returns the same state.
#[derive(Default)]
pub struct ScopeRegistry {
    states: Mutex<HashMap<ProviderId, Weak<ScopeState>>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live state for `id`, created when nobody holds one.
    pub fn state_for(&self, id: ProviderId) -> Arc<ScopeState> {
        let mut states = self.states.lock();
        if let Some(state) = states.get(&id).and_then(Weak::upgrade) {
            return state;
        }

        states.retain(|_, state| state.strong_count() > 0);
        let state = Arc::new(ScopeState::default());
        states.insert(id, Arc::downgrade(&state));
        trace!(live = states.len(), "scope state created");
        state
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<ScopeState>> {
        self.states.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Number of providers with a live state.
    pub fn len(&self) -> usize {
        self.states
            .lock()
            .values()
            .filter(|state| state.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
