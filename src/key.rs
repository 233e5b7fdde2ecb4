//! Key shapes and their serialisation into cache lookup strings.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::error::BoxError;
use crate::hash::StableHasher;

/// A value that can take part in a key.
#[derive(Clone)]
pub enum KeyValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<KeyValue>),
    /// Fields in insertion order. Hashing sorts them, so order never matters.
    Object(Vec<(String, KeyValue)>),
    /// A value with no structural representation, hashed by identity.
    Opaque(OpaqueValue),
    /// A node that may be referenced from several places, including itself.
    Shared(SharedValue),
}

/// Identity-hashed value (closures, handles, anything that is not data).
#[derive(Clone)]
pub struct OpaqueValue(pub(crate) Arc<dyn Any + Send + Sync>);

/// Shared, mutable key node. The only shape able to form a cycle.
#[derive(Clone)]
pub struct SharedValue(pub(crate) Arc<RwLock<KeyValue>>);

impl SharedValue {
    pub fn new(value: KeyValue) -> Self {
        SharedValue(Arc::new(RwLock::new(value)))
    }

    /// Replace the node's content.
    pub fn set(&self, value: KeyValue) {
        *self.0.write() = value;
    }

    /// Append to the node when it holds an array.
    pub fn push(&self, value: KeyValue) {
        if let KeyValue::Array(items) = &mut *self.0.write() {
            items.push(value);
        }
    }

    /// Insert or replace a field when the node holds an object.
    pub fn insert(&self, field: impl Into<String>, value: KeyValue) {
        if let KeyValue::Object(fields) = &mut *self.0.write() {
            upsert(fields, field.into(), value);
        }
    }
}

fn upsert(fields: &mut Vec<(String, KeyValue)>, field: String, value: KeyValue) {
    match fields.iter_mut().find(|(name, _)| *name == field) {
        Some(slot) => slot.1 = value,
        None => fields.push((field, value)),
    }
}

impl KeyValue {
    /// Build an object from `(field, value)` pairs. Later duplicates win.
    pub fn object<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<KeyValue>,
    {
        let mut out = Vec::new();
        for (field, value) in fields {
            upsert(&mut out, field.into(), value.into());
        }
        KeyValue::Object(out)
    }

    /// Build an array.
    pub fn array<V: Into<KeyValue>>(items: impl IntoIterator<Item = V>) -> Self {
        KeyValue::Array(items.into_iter().map(Into::into).collect())
    }

    /// Wrap a value that is hashed by identity rather than structure.
    pub fn opaque<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        KeyValue::Opaque(OpaqueValue(value))
    }

    /// Convert any serialisable value through its JSON representation.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(KeyValue::from)
    }

    /// JavaScript-style truthiness: `undefined`, `null`, `false`, `0`, `NaN`
    /// and `""` are falsy, everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            KeyValue::Undefined | KeyValue::Null => false,
            KeyValue::Bool(b) => *b,
            KeyValue::Int(i) => *i != 0,
            KeyValue::Float(f) => *f != 0.0 && !f.is_nan(),
            KeyValue::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            KeyValue::Int(i) => Some(*i),
            KeyValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KeyValue::Int(i) => Some(*i as f64),
            KeyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            KeyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Undefined => f.write_str("Undefined"),
            KeyValue::Null => f.write_str("Null"),
            KeyValue::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            KeyValue::Int(i) => f.debug_tuple("Int").field(i).finish(),
            KeyValue::Float(x) => f.debug_tuple("Float").field(x).finish(),
            KeyValue::String(s) => f.debug_tuple("String").field(s).finish(),
            KeyValue::Date(d) => f.debug_tuple("Date").field(d).finish(),
            KeyValue::Array(items) => f.debug_list().entries(items).finish(),
            KeyValue::Object(fields) => f
                .debug_map()
                .entries(fields.iter().map(|(k, v)| (k, v)))
                .finish(),
            KeyValue::Opaque(o) => write!(f, "Opaque({:p})", Arc::as_ptr(&o.0)),
            // Never descend: the node may reference itself.
            KeyValue::Shared(s) => write!(f, "Shared({:p})", Arc::as_ptr(&s.0)),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::String(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::String(value)
    }
}

impl From<bool> for KeyValue {
    fn from(value: bool) -> Self {
        KeyValue::Bool(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::Int(value.into())
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<u32> for KeyValue {
    fn from(value: u32) -> Self {
        KeyValue::Int(value.into())
    }
}

impl From<u64> for KeyValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => KeyValue::Int(i),
            Err(_) => KeyValue::Float(value as f64),
        }
    }
}

impl From<f64> for KeyValue {
    fn from(value: f64) -> Self {
        KeyValue::Float(value)
    }
}

impl From<DateTime<Utc>> for KeyValue {
    fn from(value: DateTime<Utc>) -> Self {
        KeyValue::Date(value)
    }
}

impl From<SharedValue> for KeyValue {
    fn from(value: SharedValue) -> Self {
        KeyValue::Shared(value)
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeyValue::Null, Into::into)
    }
}

impl<T: Into<KeyValue>> From<Vec<T>> for KeyValue {
    fn from(value: Vec<T>) -> Self {
        KeyValue::array(value)
    }
}

impl From<serde_json::Value> for KeyValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => KeyValue::Null,
            Value::Bool(b) => KeyValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => KeyValue::Int(i),
                None => KeyValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => KeyValue::String(s),
            Value::Array(items) => KeyValue::array(items),
            Value::Object(map) => KeyValue::object(map),
        }
    }
}

type ResolveFn = dyn Fn() -> Result<KeyValue, BoxError> + Send + Sync;

/// A key computed on demand, optionally paired with a stream announcing that
/// its inputs changed.
pub struct KeyResolver {
    resolve: Arc<ResolveFn>,
    changes: Mutex<Option<BoxStream<'static, ()>>>,
}

/// Logical identifier of a cached resource.
pub enum Key {
    Literal(String),
    Tuple(Vec<KeyValue>),
    Record(Vec<(String, KeyValue)>),
    Resolver(KeyResolver),
}

impl Key {
    /// A key that never fetches.
    pub fn disabled() -> Self {
        Key::Literal(String::new())
    }

    /// A key computed by `resolve` each time it is serialised.
    ///
    /// Returning an error disables fetching instead of propagating.
    pub fn resolver<F>(resolve: F) -> Self
    where
        F: Fn() -> Result<KeyValue, BoxError> + Send + Sync + 'static,
    {
        Key::Resolver(KeyResolver {
            resolve: Arc::new(resolve),
            changes: Mutex::new(None),
        })
    }

    /// A key derived from a watched value.
    ///
    /// Every change published on `source` makes the bound call site
    /// re-serialise the key and react to the new one.
    pub fn watch<T, F>(source: watch::Receiver<T>, map: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Result<KeyValue, BoxError> + Send + Sync + 'static,
    {
        let changes = WatchStream::from_changes(source.clone()).map(|_| ()).boxed();
        Key::Resolver(KeyResolver {
            resolve: Arc::new(move || map(&*source.borrow())),
            changes: Mutex::new(Some(changes)),
        })
    }

    /// Resolve the key into a single value.
    pub fn resolve(&self) -> Result<KeyValue, BoxError> {
        match self {
            Key::Literal(s) => Ok(KeyValue::String(s.clone())),
            Key::Tuple(items) => Ok(KeyValue::Array(items.clone())),
            Key::Record(fields) => Ok(KeyValue::Object(fields.clone())),
            Key::Resolver(resolver) => (resolver.resolve)(),
        }
    }

    /// Take the change stream, if this key has one. Only the first caller gets it.
    pub(crate) fn take_changes(&self) -> Option<BoxStream<'static, ()>> {
        match self {
            Key::Resolver(resolver) => resolver.changes.lock().take(),
            _ => None,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Key::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            Key::Record(fields) => f.debug_tuple("Record").field(fields).finish(),
            Key::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Literal(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Literal(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Literal(value.clone())
    }
}

impl From<Vec<KeyValue>> for Key {
    fn from(value: Vec<KeyValue>) -> Self {
        Key::Tuple(value)
    }
}

impl<T: Into<KeyValue>, const N: usize> From<[T; N]> for Key {
    fn from(value: [T; N]) -> Self {
        Key::Tuple(value.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<Key>> From<Option<K>> for Key {
    fn from(value: Option<K>) -> Self {
        value.map_or_else(Key::disabled, Into::into)
    }
}

/// Positional arguments handed to the fetcher.
#[derive(Debug, Clone, Default)]
pub struct KeyArgs(Vec<KeyValue>);

impl KeyArgs {
    fn from_resolved(value: KeyValue) -> Self {
        match value {
            KeyValue::Array(items) => KeyArgs(items),
            other => KeyArgs(vec![other]),
        }
    }

    pub fn from_values(values: Vec<KeyValue>) -> Self {
        KeyArgs(values)
    }

    pub fn get(&self, index: usize) -> Option<&KeyValue> {
        self.0.get(index)
    }

    /// The first argument as a string, the common case for URL keys.
    pub fn first_str(&self) -> Option<&str> {
        self.0.first().and_then(KeyValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<KeyValue> {
        self.0
    }
}

/// Canonical cache lookup string plus the fetcher arguments it came from.
#[derive(Debug, Clone)]
pub struct SerializedKey {
    pub key: String,
    pub args: KeyArgs,
}

impl SerializedKey {
    /// An empty key string means fetching is disabled.
    pub fn is_disabled(&self) -> bool {
        self.key.is_empty()
    }
}

/// Serialise `key` into its cache lookup string.
///
/// Resolver failures, falsy values and empty arrays all serialise to `""`.
pub fn serialize_key(key: &Key, hasher: &StableHasher) -> SerializedKey {
    let resolved = match key.resolve() {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "key resolver failed, fetching disabled");
            KeyValue::String(String::new())
        }
    };

    let is_empty_array = matches!(&resolved, KeyValue::Array(items) if items.is_empty());
    let key = if !is_empty_array && resolved.is_truthy() {
        hasher.hash(&resolved)
    } else {
        String::new()
    };

    SerializedKey {
        key,
        args: KeyArgs::from_resolved(resolved),
    }
}
