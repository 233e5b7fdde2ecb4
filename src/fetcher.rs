use async_trait::async_trait;
use std::future::Future;

use crate::error::{BoxError, FetchError, into_fetch_error};
use crate::key::KeyArgs;

/// Loads the data for a key.
///
/// Receives the serialized key's arguments: the elements of an array key, or
/// the single resolved value otherwise. Any `async` closure taking
/// [`KeyArgs`] and returning a `Result` is a fetcher:
///
/// ```ignore
/// let fetcher = |args: KeyArgs| async move {
///     let url = args.first_str().unwrap_or_default().to_string();
///     client.get(&url).await
/// };
/// ```
#[async_trait]
pub trait Fetcher<D>: Send + Sync {
    async fn fetch(&self, args: KeyArgs) -> Result<D, FetchError>;
}

#[async_trait]
impl<D, F, Fut, E> Fetcher<D> for F
where
    D: Send + 'static,
    F: Fn(KeyArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<D, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    async fn fetch(&self, args: KeyArgs) -> Result<D, FetchError> {
        (self)(args).await.map_err(into_fetch_error)
    }
}
