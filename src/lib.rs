//! swr-engine - A stale-while-revalidate (SWR) data-fetching engine for Rust
//!
//! This library provides cached, deduplicated, auto-revalidating access to
//! asynchronous resources:
//! - Stable hashing of arbitrary key shapes into cache keys
//! - One shared, observable cache entry per key
//! - Deduplication of fetches within a time window
//! - Revalidation on focus, reconnect, polling and key change
//! - Optimistic mutations with rollback
//!
//! # Example
//!
//! ```ignore
//! use swr_engine::{KeyArgs, Mutation, MutateOptions, SwrOptions, SwrScope};
//!
//! #[tokio::main]
//! async fn main() {
//!     let scope = SwrScope::new(SwrOptions::new());
//!
//!     // Every call site bound to the same key shares one entry and one fetch
//!     let user = scope.bind(
//!         ["/api/user", "42"],
//!         |args: KeyArgs| async move {
//!             Ok::<_, std::io::Error>(format!("user {}", args.get(1).and_then(|v| v.as_str()).unwrap_or("?")))
//!         },
//!         SwrOptions::new(),
//!     );
//!
//!     let mut data = user.watch_data();
//!     data.changed().await.unwrap();
//!     println!("{:?}", user.data());
//!
//!     // Write locally, then revalidate through the first subscriber
//!     user.mutate(Some(Mutation::value("renamed".to_string())), MutateOptions::new())
//!         .await
//!         .unwrap();
//! }
//! ```

mod builder;
mod config;
mod entry;
mod error;
mod fetcher;
mod hash;
mod key;
mod mutate;
mod observable;
mod scope;
mod signal;
mod store;
pub mod stores;
mod swr;

// Re-export public API
pub use builder::SwrScopeBuilder;
pub use config::{Callbacks, ErrorFn, SuccessFn, SwrConfig, SwrOptions};
pub use entry::{CacheState, Payload};
pub use error::{BoxError, FetchError, SwrError, into_fetch_error};
pub use fetcher::Fetcher;
pub use hash::StableHasher;
pub use key::{Key, KeyArgs, KeyResolver, KeyValue, OpaqueValue, SerializedKey, SharedValue, serialize_key};
pub use mutate::{MutateOptions, Mutation};
pub use observable::Observable;
pub use scope::{RevalidateCallback, ScopeRegistry, ScopeState, SubscriberId};
pub use signal::{ConnectivitySignal, ManualSignal};
pub use store::{CacheProvider, ProviderId, SharedProvider};
pub use stores::memory::MapProvider;
pub use stores::moka::{MokaProvider, MokaProviderConfig};
pub use swr::{SwrHandle, SwrScope};
