//! Layered configuration.
//!
//! [`SwrConfig`] is a fully resolved layer: every option has a value. Scopes
//! and call sites contribute partial [`SwrOptions`] layers that are merged on
//! top with [`SwrConfig::merge`].

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::Payload;
use crate::error::{FetchError, SwrError};
use crate::store::{CacheProvider, SharedProvider};

/// Success callback: `(data, serialized key, merged config)`.
pub type SuccessFn = dyn Fn(&Payload, &str, &SwrConfig) + Send + Sync;

/// Error callback: `(error, serialized key, merged config)`.
pub type ErrorFn = dyn Fn(&FetchError, &str, &SwrConfig) + Send + Sync;

/// Ordered chain of callbacks, invoked in sequence with identical arguments.
pub struct Callbacks<F: ?Sized> {
    chain: Vec<Arc<F>>,
}

impl<F: ?Sized> Callbacks<F> {
    pub fn single(callback: Arc<F>) -> Self {
        Callbacks {
            chain: vec![callback],
        }
    }

    /// Chain two optional layers, `first` running before `then`.
    ///
    /// Returns `None` when neither layer defines a callback.
    pub fn chain(first: Option<&Self>, then: Option<&Self>) -> Option<Self> {
        let chain: Vec<_> = first
            .into_iter()
            .chain(then)
            .flat_map(|layer| layer.chain.iter().cloned())
            .collect();

        (!chain.is_empty()).then_some(Callbacks { chain })
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl Callbacks<SuccessFn> {
    pub fn call(&self, data: &Payload, key: &str, config: &SwrConfig) {
        for callback in &self.chain {
            callback(data, key, config);
        }
    }
}

impl Callbacks<ErrorFn> {
    pub fn call(&self, error: &FetchError, key: &str, config: &SwrConfig) {
        for callback in &self.chain {
            callback(error, key, config);
        }
    }
}

impl<F: ?Sized> Clone for Callbacks<F> {
    fn clone(&self) -> Self {
        Callbacks {
            chain: self.chain.clone(),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Callbacks<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callbacks({})", self.chain.len())
    }
}

/// Fully resolved configuration.
#[derive(Clone)]
pub struct SwrConfig {
    /// Backing store, shared by reference across every call site using it.
    pub cache_provider: SharedProvider,
    pub revalidate_on_focus: bool,
    pub revalidate_on_reconnect: bool,
    /// Revalidate even when cached data is present.
    pub revalidate_if_stale: bool,
    /// Window suppressing duplicate fetches.
    pub deduping_interval: Duration,
    /// Polling period, zero disables polling.
    pub refresh_interval: Duration,
    pub refresh_when_hidden: bool,
    pub refresh_when_offline: bool,
    /// Minimum gap between focus-triggered fetches.
    pub focus_throttle_interval: Duration,
    /// Initial data keyed by serialized key.
    pub fallback: HashMap<String, Payload>,
    /// Initial data for a single call site. Wins over `fallback`.
    pub fallback_data: Option<Payload>,
    pub on_success: Option<Callbacks<SuccessFn>>,
    pub on_error: Option<Callbacks<ErrorFn>>,
}

impl Default for SwrConfig {
    fn default() -> Self {
        SwrConfig {
            cache_provider: SharedProvider::default(),
            revalidate_on_focus: true,
            revalidate_on_reconnect: true,
            revalidate_if_stale: true,
            deduping_interval: Duration::from_millis(2000),
            refresh_interval: Duration::ZERO,
            refresh_when_hidden: false,
            refresh_when_offline: false,
            focus_throttle_interval: Duration::from_millis(5000),
            fallback: HashMap::new(),
            fallback_data: None,
            on_success: None,
            on_error: None,
        }
    }
}

impl SwrConfig {
    /// Merge `options` on top of this layer.
    ///
    /// Every field set in `options` wins. `fallback` maps merge key by key,
    /// and callbacks chain with the `options` layer running first.
    pub fn merge(&self, options: &SwrOptions) -> SwrConfig {
        let mut fallback = self.fallback.clone();
        if let Some(overrides) = &options.fallback {
            fallback.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        SwrConfig {
            cache_provider: options
                .cache_provider
                .clone()
                .unwrap_or_else(|| self.cache_provider.clone()),
            revalidate_on_focus: options.revalidate_on_focus.unwrap_or(self.revalidate_on_focus),
            revalidate_on_reconnect: options
                .revalidate_on_reconnect
                .unwrap_or(self.revalidate_on_reconnect),
            revalidate_if_stale: options.revalidate_if_stale.unwrap_or(self.revalidate_if_stale),
            deduping_interval: options.deduping_interval.unwrap_or(self.deduping_interval),
            refresh_interval: options.refresh_interval.unwrap_or(self.refresh_interval),
            refresh_when_hidden: options.refresh_when_hidden.unwrap_or(self.refresh_when_hidden),
            refresh_when_offline: options
                .refresh_when_offline
                .unwrap_or(self.refresh_when_offline),
            focus_throttle_interval: options
                .focus_throttle_interval
                .unwrap_or(self.focus_throttle_interval),
            fallback,
            fallback_data: options
                .fallback_data
                .clone()
                .or_else(|| self.fallback_data.clone()),
            on_success: Callbacks::chain(options.on_success.as_ref(), self.on_success.as_ref()),
            on_error: Callbacks::chain(options.on_error.as_ref(), self.on_error.as_ref()),
        }
    }

    /// Initial data for a freshly created entry of `key`.
    pub fn fallback_for(&self, key: &str) -> Option<Payload> {
        self.fallback_data
            .clone()
            .or_else(|| self.fallback.get(key).cloned())
    }
}

impl fmt::Debug for SwrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwrConfig")
            .field("cache_provider", &self.cache_provider)
            .field("revalidate_on_focus", &self.revalidate_on_focus)
            .field("revalidate_on_reconnect", &self.revalidate_on_reconnect)
            .field("revalidate_if_stale", &self.revalidate_if_stale)
            .field("deduping_interval", &self.deduping_interval)
            .field("refresh_interval", &self.refresh_interval)
            .field("refresh_when_hidden", &self.refresh_when_hidden)
            .field("refresh_when_offline", &self.refresh_when_offline)
            .field("focus_throttle_interval", &self.focus_throttle_interval)
            .field("fallback", &self.fallback.keys().collect::<Vec<_>>())
            .field("fallback_data", &self.fallback_data.is_some())
            .field("on_success", &self.on_success)
            .field("on_error", &self.on_error)
            .finish()
    }
}

/// A partial configuration layer. Unset fields defer to the layer below.
///
/// Deserialises from JSON with intervals given in milliseconds:
///
/// ```ignore
/// let options = SwrOptions::from_json(r#"{ "deduping_interval_ms": 500, "revalidate_on_focus": false }"#)?;
/// ```
#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwrOptions {
    #[serde(skip)]
    pub cache_provider: Option<SharedProvider>,
    pub revalidate_on_focus: Option<bool>,
    pub revalidate_on_reconnect: Option<bool>,
    pub revalidate_if_stale: Option<bool>,
    #[serde(rename = "deduping_interval_ms", deserialize_with = "millis")]
    pub deduping_interval: Option<Duration>,
    #[serde(rename = "refresh_interval_ms", deserialize_with = "millis")]
    pub refresh_interval: Option<Duration>,
    pub refresh_when_hidden: Option<bool>,
    pub refresh_when_offline: Option<bool>,
    #[serde(rename = "focus_throttle_interval_ms", deserialize_with = "millis")]
    pub focus_throttle_interval: Option<Duration>,
    #[serde(deserialize_with = "json_payloads")]
    pub fallback: Option<HashMap<String, Payload>>,
    #[serde(deserialize_with = "json_payload")]
    pub fallback_data: Option<Payload>,
    #[serde(skip)]
    pub on_success: Option<Callbacks<SuccessFn>>,
    #[serde(skip)]
    pub on_error: Option<Callbacks<ErrorFn>>,
}

fn millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

fn json_payloads<'de, D>(deserializer: D) -> Result<Option<HashMap<String, Payload>>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = Option::<HashMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(map.map(|map| {
        map.into_iter()
            .map(|(key, value)| (key, Payload::from_json(value)))
            .collect()
    }))
}

fn json_payload<'de, D>(deserializer: D) -> Result<Option<Payload>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<serde_json::Value>::deserialize(deserializer)?.map(Payload::from_json))
}

impl SwrOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a layer from JSON.
    pub fn from_json(json: &str) -> Result<Self, SwrError> {
        serde_json::from_str(json).map_err(|e| SwrError::Config(e.to_string()))
    }

    /// Read a layer from environment variables.
    ///
    /// Environment variables (all optional):
    /// - `SWR_REVALIDATE_ON_FOCUS`: "true" or "false"
    /// - `SWR_REVALIDATE_ON_RECONNECT`: "true" or "false"
    /// - `SWR_REVALIDATE_IF_STALE`: "true" or "false"
    /// - `SWR_DEDUPING_INTERVAL_MS`: milliseconds
    /// - `SWR_REFRESH_INTERVAL_MS`: milliseconds, 0 disables polling
    /// - `SWR_REFRESH_WHEN_HIDDEN`: "true" or "false"
    /// - `SWR_REFRESH_WHEN_OFFLINE`: "true" or "false"
    /// - `SWR_FOCUS_THROTTLE_INTERVAL_MS`: milliseconds
    pub fn from_env() -> Result<Self, SwrError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read a layer through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SwrError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| lookup(name).map(|raw| parse_bool(name, &raw)).transpose();
        let duration = |name: &str| {
            lookup(name)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|_| SwrError::Config(format!("{name}: expected milliseconds, got '{raw}'")))
                })
                .transpose()
        };

        Ok(SwrOptions {
            revalidate_on_focus: flag("SWR_REVALIDATE_ON_FOCUS")?,
            revalidate_on_reconnect: flag("SWR_REVALIDATE_ON_RECONNECT")?,
            revalidate_if_stale: flag("SWR_REVALIDATE_IF_STALE")?,
            deduping_interval: duration("SWR_DEDUPING_INTERVAL_MS")?,
            refresh_interval: duration("SWR_REFRESH_INTERVAL_MS")?,
            refresh_when_hidden: flag("SWR_REFRESH_WHEN_HIDDEN")?,
            refresh_when_offline: flag("SWR_REFRESH_WHEN_OFFLINE")?,
            focus_throttle_interval: duration("SWR_FOCUS_THROTTLE_INTERVAL_MS")?,
            ..Default::default()
        })
    }

    pub fn cache_provider(mut self, provider: SharedProvider) -> Self {
        self.cache_provider = Some(provider);
        self
    }

    /// Wrap `provider` in a fresh [`SharedProvider`] and use it.
    pub fn provider<P>(self, provider: P) -> Self
    where
        P: CacheProvider + 'static,
    {
        self.cache_provider(SharedProvider::new(provider))
    }

    pub fn revalidate_on_focus(mut self, enabled: bool) -> Self {
        self.revalidate_on_focus = Some(enabled);
        self
    }

    pub fn revalidate_on_reconnect(mut self, enabled: bool) -> Self {
        self.revalidate_on_reconnect = Some(enabled);
        self
    }

    pub fn revalidate_if_stale(mut self, enabled: bool) -> Self {
        self.revalidate_if_stale = Some(enabled);
        self
    }

    pub fn deduping_interval(mut self, interval: Duration) -> Self {
        self.deduping_interval = Some(interval);
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn refresh_when_hidden(mut self, enabled: bool) -> Self {
        self.refresh_when_hidden = Some(enabled);
        self
    }

    pub fn refresh_when_offline(mut self, enabled: bool) -> Self {
        self.refresh_when_offline = Some(enabled);
        self
    }

    pub fn focus_throttle_interval(mut self, interval: Duration) -> Self {
        self.focus_throttle_interval = Some(interval);
        self
    }

    /// Initial data for the entry stored under `serialized_key`.
    pub fn fallback<V>(mut self, serialized_key: impl Into<String>, value: V) -> Self
    where
        V: Send + Sync + 'static,
    {
        self.fallback
            .get_or_insert_with(HashMap::new)
            .insert(serialized_key.into(), Payload::from_typed(value));
        self
    }

    /// Initial data for this call site only.
    pub fn fallback_data<V>(mut self, value: V) -> Self
    where
        V: Send + Sync + 'static,
    {
        self.fallback_data = Some(Payload::from_typed(value));
        self
    }

    /// Add a success callback to this layer, after any already added.
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Payload, &str, &SwrConfig) + Send + Sync + 'static,
    {
        let added = Callbacks::single(Arc::new(callback) as Arc<SuccessFn>);
        self.on_success = Callbacks::chain(self.on_success.as_ref(), Some(&added));
        self
    }

    /// Add an error callback to this layer, after any already added.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&FetchError, &str, &SwrConfig) + Send + Sync + 'static,
    {
        let added = Callbacks::single(Arc::new(callback) as Arc<ErrorFn>);
        self.on_error = Callbacks::chain(self.on_error.as_ref(), Some(&added));
        self
    }
}

impl fmt::Debug for SwrOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwrOptions")
            .field("cache_provider", &self.cache_provider)
            .field("revalidate_on_focus", &self.revalidate_on_focus)
            .field("revalidate_on_reconnect", &self.revalidate_on_reconnect)
            .field("revalidate_if_stale", &self.revalidate_if_stale)
            .field("deduping_interval", &self.deduping_interval)
            .field("refresh_interval", &self.refresh_interval)
            .field("refresh_when_hidden", &self.refresh_when_hidden)
            .field("refresh_when_offline", &self.refresh_when_offline)
            .field("focus_throttle_interval", &self.focus_throttle_interval)
            .field("fallback", &self.fallback.as_ref().map(HashMap::len))
            .field("fallback_data", &self.fallback_data.is_some())
            .field("on_success", &self.on_success)
            .field("on_error", &self.on_error)
            .finish()
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, SwrError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(SwrError::Config(format!("{name}: expected true or false, got '{raw}'"))),
    }
}
