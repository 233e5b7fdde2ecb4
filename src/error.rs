use std::sync::Arc;

/// Boxed error accepted from fetchers, key resolvers and mutation futures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error captured from a fetcher or a mutation future.
///
/// Shared behind an `Arc` so the same error can sit in a cache entry, be handed
/// to every `on_error` callback and still be returned to a `mutate` caller.
pub type FetchError = Arc<dyn std::error::Error + Send + Sync>;

/// Error type for cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SwrError {
    /// The value or future passed to `mutate` failed.
    #[error("mutation of key '{key}' failed: {source}")]
    Mutation {
        key: String,
        #[source]
        source: FetchError,
    },
    /// The cached payload could not be read as the requested type.
    #[error("cached value for key '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
    /// Options could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SwrError {
    /// Create a new mutation error.
    pub fn mutation(key: impl Into<String>, source: FetchError) -> Self {
        SwrError::Mutation {
            key: key.into(),
            source,
        }
    }

    /// Create a new type mismatch error for `V`.
    pub fn type_mismatch<V>(key: impl Into<String>) -> Self {
        SwrError::TypeMismatch {
            key: key.into(),
            expected: std::any::type_name::<V>(),
        }
    }
}

/// Convert anything error-like into a shareable [`FetchError`].
pub fn into_fetch_error<E>(err: E) -> FetchError
where
    E: Into<BoxError>,
{
    Arc::from(err.into())
}
