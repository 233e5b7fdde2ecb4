use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::builder::SwrScopeBuilder;
use crate::config::{SwrConfig, SwrOptions};
use crate::entry::{CacheState, Payload};
use crate::error::{FetchError, SwrError, into_fetch_error};
use crate::fetcher::Fetcher;
use crate::hash::StableHasher;
use crate::key::{Key, KeyArgs, SerializedKey, serialize_key};
use crate::mutate::{MutateOptions, Mutation, mutate_in};
use crate::observable::Observable;
use crate::scope::{RevalidateCallback, ScopeRegistry, ScopeState, SubscriberId};
use crate::signal::ConnectivitySignal;

/// An isolation boundary: one resolved configuration, and through its cache
/// provider, one set of cache entries and subscriber bookkeeping.
///
/// Cloning is cheap and yields the same scope.
#[derive(Clone)]
pub struct SwrScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    config: SwrConfig,
    hasher: Arc<StableHasher>,
    registry: Arc<ScopeRegistry>,
    /// Subscriber bookkeeping of `config.cache_provider`, held for as long
    /// as the scope lives.
    state: Arc<ScopeState>,
    signal: Arc<dyn ConnectivitySignal>,
}

impl SwrScope {
    /// Create a root scope with the default signal.
    pub fn new(options: SwrOptions) -> Self {
        SwrScopeBuilder::new().options(options).build()
    }

    pub fn builder() -> SwrScopeBuilder {
        SwrScopeBuilder::new()
    }

    pub(crate) fn root(config: SwrConfig, signal: Arc<dyn ConnectivitySignal>) -> Self {
        let registry = Arc::new(ScopeRegistry::new());
        SwrScope {
            inner: Arc::new(ScopeInner {
                state: registry.state_for(config.cache_provider.id()),
                config,
                hasher: Arc::new(StableHasher::new()),
                registry,
                signal,
            }),
        }
    }

    /// Derive a nested scope whose config is this one's merged with `options`.
    ///
    /// Supplying a different cache provider isolates the nested scope: it gets
    /// its own entries and its own subscriber bookkeeping.
    pub fn configure(&self, options: SwrOptions) -> SwrScope {
        let config = self.inner.config.merge(&options);

        SwrScope {
            inner: Arc::new(ScopeInner {
                state: self.inner.registry.state_for(config.cache_provider.id()),
                config,
                hasher: self.inner.hasher.clone(),
                registry: self.inner.registry.clone(),
                signal: self.inner.signal.clone(),
            }),
        }
    }

    pub fn config(&self) -> &SwrConfig {
        &self.inner.config
    }

    pub fn signal(&self) -> &Arc<dyn ConnectivitySignal> {
        &self.inner.signal
    }

    /// Subscriber bookkeeping of this scope's cache provider.
    pub fn scope_state(&self) -> Arc<ScopeState> {
        self.inner.state.clone()
    }

    /// Serialise `key` with this scope's hasher.
    pub fn serialize(&self, key: &Key) -> SerializedKey {
        serialize_key(key, &self.inner.hasher)
    }

    /// Bind a call site to `key`.
    ///
    /// Looks up or creates the cache entry, fetches unless deduplicated, and
    /// registers the revalidation triggers enabled in the merged config.
    /// Dropping the returned handle unbinds.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind<D, F>(&self, key: impl Into<Key>, fetcher: F, options: SwrOptions) -> SwrHandle<D>
    where
        D: Send + Sync + 'static,
        F: Fetcher<D> + 'static,
    {
        let config = Arc::new(self.inner.config.merge(&options));
        let state = self.inner.registry.state_for(config.cache_provider.id());
        let key = key.into();

        let binding = Arc::new_cyclic(|this| Binding {
            scope: self.clone(),
            config,
            state,
            fetcher: Arc::new(fetcher),
            key,
            current: Mutex::new(Bound::detached()),
            current_key: Observable::new(String::new()),
            tasks: Mutex::new(Vec::new()),
            this: this.clone(),
        });

        let serialized = self.serialize(&binding.key);
        binding.rebind(&mut binding.current.lock(), serialized);
        binding.register_triggers();

        SwrHandle { binding }
    }
}

/// The entry a binding currently observes.
struct Bound {
    key: SerializedKey,
    entry: Arc<CacheState>,
    subscriber: Option<SubscriberId>,
}

impl Bound {
    fn detached() -> Self {
        Bound {
            key: SerializedKey {
                key: String::new(),
                args: KeyArgs::default(),
            },
            entry: Arc::new(CacheState::empty()),
            subscriber: None,
        }
    }
}

/// One call site's fetch/revalidate state machine.
struct Binding<D> {
    scope: SwrScope,
    config: Arc<SwrConfig>,
    state: Arc<ScopeState>,
    fetcher: Arc<dyn Fetcher<D>>,
    key: Key,
    current: Mutex<Bound>,
    current_key: Observable<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    this: Weak<Binding<D>>,
}

impl<D> Binding<D> {
    fn unbind(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let current = self.current.lock();
        if let Some(id) = current.subscriber {
            self.state.unsubscribe(&current.key.key, id);
        }
    }
}

impl<D> Binding<D>
where
    D: Send + Sync + 'static,
{
    /// Re-serialise the key and rebind when the result changed.
    fn sync_key(&self) {
        let serialized = self.scope.serialize(&self.key);
        let mut current = self.current.lock();
        if serialized.key == current.key.key {
            return;
        }
        debug!(key = %serialized.key, "key changed");
        self.rebind(&mut current, serialized);
    }

    /// Move this binding onto `serialized`, fetching when the entry is new,
    /// empty or stale.
    ///
    /// Runs under the `current` lock, so concurrent rebinds cannot interleave
    /// their unsubscribe, subscribe and swap.
    fn rebind(&self, current: &mut Bound, serialized: SerializedKey) {
        let config = &self.config;
        let key = serialized.key.clone();

        if let Some(id) = current.subscriber.take() {
            self.state.unsubscribe(&current.key.key, id);
        }

        let fallback = config.fallback_for(&key);

        if serialized.is_disabled() {
            let entry = CacheState::empty();
            entry.data.set(fallback);
            *current = Bound {
                key: serialized,
                entry: Arc::new(entry),
                subscriber: None,
            };
            self.current_key.set(key);
            return;
        }

        let provider = &config.cache_provider;
        let existing = provider.get(&key);

        let has_data = existing
            .as_ref()
            .map_or(fallback.is_some(), |entry| entry.has_data());
        let skip = existing
            .as_ref()
            .is_some_and(|entry| is_deduplicated(config, true, entry));
        let will_fetch = (config.revalidate_if_stale || !has_data) && !skip;

        let entry = match existing {
            Some(entry) => entry,
            None => {
                let entry = Arc::new(CacheState::created(fallback, will_fetch));
                provider.set(&key, entry.clone());
                entry
            }
        };

        let subscriber = self.state.subscribe(&key, self.revalidate_callback());
        let fetch = will_fetch.then(|| start_fetch(self, &serialized, &entry));

        if fetch.is_none() {
            trace!(key = %key, "fetch on bind skipped");
        }

        *current = Bound {
            key: serialized,
            entry,
            subscriber: Some(subscriber),
        };
        self.current_key.set(key);

        if let Some(fetch) = fetch {
            tokio::spawn(fetch);
        }
    }

    /// Guarded fetch of the current key. `None` when skipped.
    ///
    /// The held entry is reconciled with the provider first: if the provider
    /// dropped it, it is stored again, and if another entry replaced it, the
    /// binding follows that one. Either way the dedup guard sees the entry
    /// the fetch lands in.
    fn fetch_data(&self, dedup: bool) -> Option<BoxFuture<'static, ()>> {
        let (serialized, entry) = {
            let mut current = self.current.lock();
            if current.key.is_disabled() {
                return None;
            }

            let provider = &self.config.cache_provider;
            match provider.get(&current.key.key) {
                Some(stored) if Arc::ptr_eq(&stored, &current.entry) => {}
                Some(stored) => {
                    debug!(key = %current.key.key, "entry replaced in provider, following it");
                    current.entry = stored;
                }
                None => {
                    debug!(key = %current.key.key, "entry missing from provider, restoring it");
                    provider.set(&current.key.key, current.entry.clone());
                }
            }
            (current.key.clone(), current.entry.clone())
        };

        if is_deduplicated(&self.config, dedup, &entry) {
            trace!(key = %serialized.key, "fetch deduplicated");
            return None;
        }

        Some(start_fetch(self, &serialized, &entry))
    }

    /// Revalidate entry point stored in the scope state.
    fn revalidate_callback(&self) -> RevalidateCallback {
        let this = self.this.clone();
        Arc::new(move |dedup| {
            this.upgrade()
                .and_then(|binding| binding.fetch_data(dedup))
                .unwrap_or_else(|| async {}.boxed())
        })
    }

    fn spawn_fetch(&self, dedup: bool) {
        if let Some(fetch) = self.fetch_data(dedup) {
            tokio::spawn(fetch);
        }
    }

    fn on_focus(&self) {
        let entry = self.current.lock().entry.clone();
        if entry
            .since_fetch()
            .is_some_and(|elapsed| elapsed < self.config.focus_throttle_interval)
        {
            trace!("focus revalidation throttled");
            return;
        }
        self.spawn_fetch(true);
    }

    fn on_refresh(&self) {
        let signal = self.scope.signal();
        let skip_offline = !self.config.refresh_when_offline && !signal.is_online();
        let skip_hidden = !self.config.refresh_when_hidden && signal.is_hidden();
        if skip_offline || skip_hidden {
            return;
        }
        self.spawn_fetch(true);
    }

    /// Spawn the focus, reconnect, polling and key-change tasks.
    fn register_triggers(&self) {
        let config = &self.config;
        let signal = self.scope.signal();
        let revalidates = config.revalidate_if_stale || !self.current.lock().entry.has_data();

        let mut tasks = Vec::new();

        if config.revalidate_on_focus && revalidates {
            let events = signal.focus_events();
            tasks.push(self.spawn_trigger(events, |binding| binding.on_focus()));
        }

        if config.revalidate_on_reconnect && revalidates {
            let events = signal.reconnect_events();
            tasks.push(self.spawn_trigger(events, |binding| binding.spawn_fetch(true)));
        }

        if !config.refresh_interval.is_zero() {
            let period = config.refresh_interval;
            let this = self.this.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(binding) = this.upgrade() else {
                        break;
                    };
                    binding.on_refresh();
                }
            }));
        }

        if let Some(changes) = self.key.take_changes() {
            tasks.push(self.spawn_trigger(changes, |binding| binding.sync_key()));
        }

        self.tasks.lock().extend(tasks);
    }

    fn spawn_trigger<S>(&self, mut events: S, react: fn(&Binding<D>)) -> JoinHandle<()>
    where
        S: futures::Stream<Item = ()> + Send + Unpin + 'static,
    {
        let this = self.this.clone();
        tokio::spawn(async move {
            while events.next().await.is_some() {
                let Some(binding) = this.upgrade() else {
                    break;
                };
                react(&binding);
            }
        })
    }
}

/// The dedup guard: skip when deduplicating and the entry was fetched within
/// the window, or is still validating and the window is not zero.
fn is_deduplicated(config: &SwrConfig, dedup: bool, entry: &CacheState) -> bool {
    if !dedup {
        return false;
    }
    let interval = config.deduping_interval;
    let within_window = entry
        .since_fetch()
        .is_some_and(|elapsed| elapsed < interval);

    within_window || (entry.is_validating.get() && !interval.is_zero())
}

/// Mark the entry validating and return the fetch to run.
///
/// The returned future owns everything it touches, so it still lands in the
/// shared entry if the binding goes away meanwhile.
fn start_fetch<D>(
    binding: &Binding<D>,
    serialized: &SerializedKey,
    entry: &Arc<CacheState>,
) -> BoxFuture<'static, ()>
where
    D: Send + Sync + 'static,
{
    entry.is_validating.set(true);
    debug!(key = %serialized.key, "fetch started");

    run_fetch(
        binding.fetcher.clone(),
        binding.config.clone(),
        serialized.key.clone(),
        serialized.args.clone(),
        entry.clone(),
    )
    .boxed()
}

async fn run_fetch<D>(
    fetcher: Arc<dyn Fetcher<D>>,
    config: Arc<SwrConfig>,
    key: String,
    args: KeyArgs,
    entry: Arc<CacheState>,
) where
    D: Send + Sync + 'static,
{
    let result = match AssertUnwindSafe(fetcher.fetch(args)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            warn!(key = %key, "fetcher panicked");
            Err(into_fetch_error(panic_message(panic)))
        }
    };

    match result {
        Ok(data) => {
            let payload = Payload::from_typed(data);
            entry.data.set(Some(payload.clone()));
            entry.fetched_in.set(Some(Instant::now()));
            debug!(key = %key, "fetch succeeded");

            if let Some(callbacks) = &config.on_success {
                callbacks.call(&payload, &key, &config);
            }
        }
        Err(err) => {
            entry.error.set(Some(err.clone()));
            debug!(key = %key, error = %err, "fetch failed");

            if let Some(callbacks) = &config.on_error {
                callbacks.call(&err, &key, &config);
            }
        }
    }

    entry.is_validating.set(false);
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("fetcher panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("fetcher panicked: {message}")
    } else {
        "fetcher panicked".to_string()
    }
}

/// A bound call site.
///
/// Exposes read-only views of the current cache entry and a `mutate` bound to
/// the current key. Dropping the handle stops its triggers and removes its
/// revalidate registration; a fetch already in flight still completes.
pub struct SwrHandle<D> {
    binding: Arc<Binding<D>>,
}

impl<D> SwrHandle<D>
where
    D: Send + Sync + 'static,
{
    /// The current serialized key. Empty when fetching is disabled.
    pub fn key(&self) -> String {
        self.binding.current.lock().key.key.clone()
    }

    /// The cache entry this handle currently observes.
    pub fn entry(&self) -> Arc<CacheState> {
        self.binding.current.lock().entry.clone()
    }

    pub fn error(&self) -> Option<FetchError> {
        self.entry().error.get()
    }

    pub fn is_validating(&self) -> bool {
        self.entry().is_validating.get()
    }

    pub fn watch_data(&self) -> watch::Receiver<Option<Payload>> {
        self.entry().data.subscribe()
    }

    pub fn watch_error(&self) -> watch::Receiver<Option<FetchError>> {
        self.entry().error.subscribe()
    }

    pub fn watch_validating(&self) -> watch::Receiver<bool> {
        self.entry().is_validating.subscribe()
    }

    /// Notified whenever the serialized key changes. Watchers obtained from
    /// the other `watch_*` methods follow the entry of the old key and must
    /// be re-acquired.
    pub fn watch_key(&self) -> watch::Receiver<String> {
        self.binding.current_key.subscribe()
    }

    /// Re-resolve the key now and react if it changed.
    pub fn sync_key(&self) {
        self.binding.sync_key();
    }

    /// The merged config of this call site.
    pub fn config(&self) -> &SwrConfig {
        &self.binding.config
    }
}

impl<D> SwrHandle<D>
where
    D: Clone + DeserializeOwned + Send + Sync + 'static,
{
    /// Current data. A payload of another type reads as `None`.
    pub fn data(&self) -> Option<D> {
        self.try_data().unwrap_or_else(|err| {
            warn!(error = %err, "cached data has an unexpected type");
            None
        })
    }

    pub fn try_data(&self) -> Result<Option<D>, SwrError> {
        let (key, entry) = {
            let current = self.binding.current.lock();
            (current.key.key.clone(), current.entry.clone())
        };
        entry.data_as::<D>(&key)
    }

    /// Mutate the current key of this call site.
    pub async fn mutate(
        &self,
        mutation: Option<Mutation<D>>,
        options: MutateOptions<D>,
    ) -> Result<Option<D>, SwrError> {
        let serialized = self.binding.current.lock().key.clone();
        mutate_in(
            self.binding.config.cache_provider.clone(),
            self.binding.state.clone(),
            serialized,
            mutation,
            options,
        )
        .await
    }
}

impl<D> Drop for SwrHandle<D> {
    fn drop(&mut self) {
        self.binding.unbind();
    }
}
