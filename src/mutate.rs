//! Programmatic cache writes with optimistic updates and rollback.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::entry::{CacheState, Payload};
use crate::error::{BoxError, FetchError, SwrError, into_fetch_error};
use crate::key::{Key, SerializedKey};
use crate::scope::ScopeState;
use crate::store::SharedProvider;
use crate::swr::SwrScope;

type UpdateFn<D> = Box<dyn FnOnce(Option<D>) -> Mutation<D> + Send>;

/// What a mutation writes.
pub enum Mutation<D> {
    /// Write this value.
    Value(D),
    /// Write what this future resolves to, or fail the mutation.
    Future(BoxFuture<'static, Result<D, FetchError>>),
    /// Compute the mutation from the currently cached data.
    Updater(UpdateFn<D>),
}

impl<D> Mutation<D>
where
    D: Send + 'static,
{
    pub fn value(value: D) -> Self {
        Mutation::Value(value)
    }

    pub fn future<Fut, E>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<D, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Mutation::Future(async move { future.await.map_err(into_fetch_error) }.boxed())
    }

    pub fn update<F>(update: F) -> Self
    where
        F: FnOnce(Option<D>) -> Mutation<D> + Send + 'static,
    {
        Mutation::Updater(Box::new(update))
    }

    /// A mutation that fails with `err`.
    pub fn fail<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        let err = into_fetch_error(err);
        Mutation::Future(async move { Err(err) }.boxed())
    }
}

/// Options of one `mutate` call.
pub struct MutateOptions<D> {
    /// Written to the entry immediately, before the mutation resolves.
    pub optimistic_data: Option<D>,
    /// Restore the pre-mutation data when the mutation fails.
    pub rollback_on_error: bool,
    /// Revalidate the key through its first subscriber afterwards.
    pub revalidate: bool,
}

impl<D> Default for MutateOptions<D> {
    fn default() -> Self {
        MutateOptions {
            optimistic_data: None,
            rollback_on_error: false,
            revalidate: true,
        }
    }
}

impl<D> MutateOptions<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn optimistic_data(mut self, data: D) -> Self {
        self.optimistic_data = Some(data);
        self
    }

    pub fn rollback_on_error(mut self, rollback: bool) -> Self {
        self.rollback_on_error = rollback;
        self
    }

    pub fn revalidate(mut self, revalidate: bool) -> Self {
        self.revalidate = revalidate;
        self
    }
}

impl SwrScope {
    /// Write `mutation` to the entry of `key` and revalidate it.
    ///
    /// Works for keys nobody is bound to: a missing entry is created. With no
    /// mutation, only the revalidation runs. Returns the written value, or the
    /// current data when nothing was written.
    ///
    /// A failing mutation is returned as [`SwrError::Mutation`], after the
    /// rollback when `rollback_on_error` is set. Without rollback the
    /// optimistic data stays in place.
    pub async fn mutate<D>(
        &self,
        key: impl Into<Key>,
        mutation: Option<Mutation<D>>,
        options: MutateOptions<D>,
    ) -> Result<Option<D>, SwrError>
    where
        D: Clone + DeserializeOwned + Send + Sync + 'static,
    {
        let serialized = self.serialize(&key.into());
        mutate_in(
            self.config().cache_provider.clone(),
            self.scope_state(),
            serialized,
            mutation,
            options,
        )
        .await
    }
}

/// Mutate `serialized` in `provider`, revalidating through `state`.
///
/// A call site bound with its own provider passes that provider here, so its
/// writes land in the entry it observes.
pub(crate) async fn mutate_in<D>(
    provider: SharedProvider,
    state: Arc<ScopeState>,
    serialized: SerializedKey,
    mutation: Option<Mutation<D>>,
    options: MutateOptions<D>,
) -> Result<Option<D>, SwrError>
where
    D: Clone + DeserializeOwned + Send + Sync + 'static,
{
    let key = serialized.key;
    if key.is_empty() {
        trace!("mutate on a disabled key ignored");
        return Ok(None);
    }

    let entry = match provider.get(&key) {
        Some(entry) => entry,
        None => {
            let entry = Arc::new(CacheState::empty());
            provider.set(&key, entry.clone());
            entry
        }
    };

    // Updaters see the data as it is before the optimistic write.
    let mut source = mutation;
    let pending = loop {
        match source {
            None => break None,
            Some(Mutation::Updater(update)) => {
                source = Some(update(entry.data_as::<D>(&key)?));
            }
            Some(Mutation::Value(value)) => break Some(async move { Ok(value) }.boxed()),
            Some(Mutation::Future(future)) => break Some(future),
        }
    };

    let snapshot = entry.data.get();
    if let Some(optimistic) = options.optimistic_data {
        entry.data.set(Some(Payload::from_typed(optimistic)));
    }

    let written = match pending {
        None => None,
        Some(future) => match future.await {
            Ok(value) => Some(value),
            Err(err) => {
                if options.rollback_on_error {
                    debug!(key = %key, "mutation failed, rolling back");
                    entry.data.set(snapshot);
                }
                return Err(SwrError::mutation(key, err));
            }
        },
    };

    let result = match written {
        Some(value) => {
            entry.data.set(Some(Payload::from_typed(value.clone())));
            provider.set(&key, entry.clone());
            Some(value)
        }
        None => entry.data_as::<D>(&key)?,
    };

    if options.revalidate
        && let Some(revalidate) = state.first_subscriber(&key)
    {
        revalidate(false).await;
    }

    Ok(result)
}
