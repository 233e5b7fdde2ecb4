use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use crate::error::{FetchError, SwrError};
use crate::observable::Observable;

/// Type-erased data stored in a cache entry.
///
/// Entries are shared by every call site bound to a key, whatever type each
/// of them reads, so data is kept behind `Arc<dyn Any>` and downcast on read.
#[derive(Clone)]
pub enum Payload {
    /// Value written by a fetcher or a mutation.
    ///
    /// Cloning only bumps the reference count; reads downcast back to the
    /// original type without any serialisation.
    Typed(Arc<dyn Any + Send + Sync>),
    /// Value that arrived as JSON, typically fallback data loaded from config.
    ///
    /// Deserialised into the requested type on every read.
    Json(serde_json::Value),
}

impl Payload {
    /// Wrap a typed value.
    pub fn from_typed<V>(value: V) -> Self
    where
        V: Send + Sync + 'static,
    {
        Payload::Typed(Arc::new(value))
    }

    /// Wrap a JSON value.
    pub fn from_json(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }

    /// Borrow the value when it is a `Typed` payload of type `V`.
    pub fn downcast_ref<V: 'static>(&self) -> Option<&V> {
        match self {
            Payload::Typed(value) => value.downcast_ref::<V>(),
            Payload::Json(_) => None,
        }
    }

    /// Read the payload as `V`.
    ///
    /// - `Typed`: downcasts and clones the value out of the `Arc`
    /// - `Json`: deserialises the JSON value into `V`
    pub fn to_typed<V>(&self, key: &str) -> Result<V, SwrError>
    where
        V: Clone + DeserializeOwned + 'static,
    {
        match self {
            Payload::Typed(value) => value
                .downcast_ref::<V>()
                .cloned()
                .ok_or_else(|| SwrError::type_mismatch::<V>(key)),
            Payload::Json(value) => {
                serde_json::from_value(value.clone()).map_err(|_| SwrError::type_mismatch::<V>(key))
            }
        }
    }

    /// Whether both payloads point at the same stored value.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        match (self, other) {
            (Payload::Typed(a), Payload::Typed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Typed(value) => write!(f, "Typed({:p})", Arc::as_ptr(value)),
            Payload::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

/// The cache entry for one serialized key.
///
/// Every field is observable on its own, and the entry itself is shared by
/// `Arc` between the store and every call site bound to the key, so a write
/// from any of them is seen by all of them.
#[derive(Debug)]
pub struct CacheState {
    pub data: Observable<Option<Payload>>,
    pub error: Observable<Option<FetchError>>,
    /// True only while a fetch is outstanding.
    pub is_validating: Observable<bool>,
    /// When the last successful fetch landed. `None` means never.
    pub fetched_in: Observable<Option<Instant>>,
}

impl CacheState {
    /// Entry created by a call site binding to a key for the first time.
    ///
    /// `fetched_in` starts at now so concurrent binds fall inside the
    /// dedup window of the first one.
    pub fn created(data: Option<Payload>, is_validating: bool) -> Self {
        CacheState {
            data: Observable::new(data),
            error: Observable::new(None),
            is_validating: Observable::new(is_validating),
            fetched_in: Observable::new(Some(Instant::now())),
        }
    }

    /// Entry holding no data that has never been fetched.
    pub fn empty() -> Self {
        CacheState {
            data: Observable::new(None),
            error: Observable::new(None),
            is_validating: Observable::new(false),
            fetched_in: Observable::new(None),
        }
    }

    /// Entry seeded with data, e.g. restored from elsewhere before any fetch.
    pub fn with_data<V>(value: V) -> Self
    where
        V: Send + Sync + 'static,
    {
        let state = CacheState::empty();
        state.data.set(Some(Payload::from_typed(value)));
        state
    }

    /// Read `data` as `V`.
    pub fn data_as<V>(&self, key: &str) -> Result<Option<V>, SwrError>
    where
        V: Clone + DeserializeOwned + 'static,
    {
        self.data
            .with(|data| data.as_ref().map(|payload| payload.to_typed(key)))
            .transpose()
    }

    pub fn has_data(&self) -> bool {
        self.data.with(Option::is_some)
    }

    /// Time elapsed since the last successful fetch.
    pub fn since_fetch(&self) -> Option<Duration> {
        self.fetched_in.get().map(|at| at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_payload_roundtrip() {
        let payload = Payload::from_typed(vec![1u32, 2, 3]);
        assert_eq!(payload.to_typed::<Vec<u32>>("k").unwrap(), vec![1, 2, 3]);
        assert_eq!(payload.downcast_ref::<Vec<u32>>().map(Vec::len), Some(3));
    }

    #[test]
    fn test_json_payload_deserializes() {
        let payload = Payload::from_json(serde_json::json!({ "name": "Alice" }));
        let value: std::collections::HashMap<String, String> = payload.to_typed("k").unwrap();
        assert_eq!(value["name"], "Alice");
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let payload = Payload::from_typed(42u8);
        let err = payload.to_typed::<String>("user").unwrap_err();
        assert!(matches!(err, SwrError::TypeMismatch { ref key, .. } if key == "user"));
    }

    #[test]
    fn test_entry_constructors() {
        let created = CacheState::created(None, true);
        assert!(created.is_validating.get());
        assert!(created.fetched_in.get().is_some());
        assert!(!created.has_data());

        let seeded = CacheState::with_data(String::from("cached"));
        assert!(!seeded.is_validating.get());
        assert!(seeded.fetched_in.get().is_none());
        assert_eq!(
            seeded.data_as::<String>("k").unwrap().as_deref(),
            Some("cached")
        );
    }
}
