//! Builder API for creating root scopes.
//!
//! A root scope owns the key hasher and the scope-state registry shared by
//! every scope later derived from it with [`SwrScope::configure`].

use std::sync::Arc;

use crate::config::{SwrConfig, SwrOptions};
use crate::signal::{ConnectivitySignal, ManualSignal};
use crate::store::{CacheProvider, SharedProvider};
use crate::swr::SwrScope;

/// Builder for root scopes.
///
/// # Example
///
/// ```ignore
/// use swr_engine::{ManualSignal, MokaProvider, MokaProviderConfig, SwrScope};
/// use std::sync::Arc;
///
/// let signal = Arc::new(ManualSignal::new());
///
/// let scope = SwrScope::builder()
///     .provider(MokaProvider::new(MokaProviderConfig::default()))
///     .signal(signal.clone())
///     .build();
///
/// // Later, from the host's event loop
/// signal.focus();
/// ```
pub struct SwrScopeBuilder {
    options: SwrOptions,
    signal: Option<Arc<dyn ConnectivitySignal>>,
}

impl SwrScopeBuilder {
    /// Create a new SwrScopeBuilder.
    pub fn new() -> Self {
        SwrScopeBuilder {
            options: SwrOptions::default(),
            signal: None,
        }
    }

    /// Use `options` as the scope layer, replacing any set before.
    pub fn options(mut self, options: SwrOptions) -> Self {
        self.options = options;
        self
    }

    /// Use `provider` as the scope's cache provider.
    pub fn provider<P>(mut self, provider: P) -> Self
    where
        P: CacheProvider + 'static,
    {
        self.options.cache_provider = Some(SharedProvider::new(provider));
        self
    }

    /// Share an existing provider with this scope.
    pub fn shared_provider(mut self, provider: SharedProvider) -> Self {
        self.options.cache_provider = Some(provider);
        self
    }

    /// Use `signal` for focus, reconnect and visibility.
    ///
    /// Defaults to a [`ManualSignal`] nobody drives.
    pub fn signal(mut self, signal: Arc<dyn ConnectivitySignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Build the scope, resolving the options against the defaults.
    pub fn build(self) -> SwrScope {
        let config = SwrConfig::default().merge(&self.options);
        let signal = self
            .signal
            .unwrap_or_else(|| Arc::new(ManualSignal::new()));
        SwrScope::root(config, signal)
    }
}

impl Default for SwrScopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
