//! Stable hashing of key values.
//!
//! The output is a compact, deterministic string used as a cache lookup key.
//! It is not a serialisation format and is not meant to be parsed back.
//!
//! - Primitives hash through their display form, strings are JSON quoted so
//!   `1` and `"1"` never collide.
//! - Dates hash to ISO-8601 with millisecond precision.
//! - Arrays hash to `@` followed by `hash(item),` for every item.
//! - Objects hash to `#` followed by `field:hash(value),` with fields sorted,
//!   skipping `Undefined` values.
//! - Opaque values and shared nodes get a per-instance token `N~` recorded
//!   in an identity table. Shared nodes then record their structural hash;
//!   the token is written first so cycles terminate.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::SecondsFormat;
use parking_lot::Mutex;

use crate::key::{KeyValue, OpaqueValue, SharedValue};

/// Table size that triggers dropping tokens of dead instances.
const PRUNE_THRESHOLD: usize = 1024;

struct Token {
    owner: Weak<dyn Any + Send + Sync>,
    hash: String,
}

struct IdentityTable {
    counter: u64,
    tokens: HashMap<usize, Token>,
    next_prune: usize,
}

impl IdentityTable {
    fn lookup(&self, addr: usize) -> Option<String> {
        self.tokens
            .get(&addr)
            .filter(|token| token.owner.strong_count() > 0)
            .map(|token| token.hash.clone())
    }

    fn assign(&mut self, addr: usize, owner: Weak<dyn Any + Send + Sync>) -> String {
        if self.tokens.len() >= self.next_prune {
            self.tokens.retain(|_, token| token.owner.strong_count() > 0);
            self.next_prune = (self.tokens.len() * 2).max(PRUNE_THRESHOLD);
        }

        self.counter += 1;
        let hash = format!("{}~", self.counter);
        self.tokens.insert(
            addr,
            Token {
                owner,
                hash: hash.clone(),
            },
        );
        hash
    }

    fn record(&mut self, addr: usize, hash: String) {
        if let Some(token) = self.tokens.get_mut(&addr) {
            token.hash = hash;
        }
    }
}

/// Deterministic hasher for [`KeyValue`]s.
///
/// Identity tokens live as long as the hasher, so one hasher is shared by
/// every scope derived from the same root.
pub struct StableHasher {
    table: Mutex<IdentityTable>,
}

impl StableHasher {
    pub fn new() -> Self {
        StableHasher {
            table: Mutex::new(IdentityTable {
                counter: 0,
                tokens: HashMap::new(),
                next_prune: PRUNE_THRESHOLD,
            }),
        }
    }

    /// Hash `value`.
    pub fn hash(&self, value: &KeyValue) -> String {
        match value {
            KeyValue::Undefined => "undefined".to_string(),
            KeyValue::Null => "null".to_string(),
            KeyValue::Bool(b) => b.to_string(),
            KeyValue::Int(i) => i.to_string(),
            KeyValue::Float(f) => format_number(*f),
            KeyValue::String(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}")),
            KeyValue::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
            KeyValue::Array(items) => self.hash_array(items),
            KeyValue::Object(fields) => self.hash_object(fields),
            KeyValue::Opaque(opaque) => self.hash_opaque(opaque),
            KeyValue::Shared(shared) => self.hash_shared(shared),
        }
    }

    /// Number of identity tokens currently recorded.
    pub fn tracked(&self) -> usize {
        self.table.lock().tokens.len()
    }

    fn hash_array(&self, items: &[KeyValue]) -> String {
        let mut out = String::from("@");
        for item in items {
            out.push_str(&self.hash(item));
            out.push(',');
        }
        out
    }

    fn hash_object(&self, fields: &[(String, KeyValue)]) -> String {
        let mut sorted: Vec<_> = fields
            .iter()
            .filter(|(_, value)| !matches!(value, KeyValue::Undefined))
            .collect();
        // Fields are emitted in descending order.
        sorted.sort_by(|a, b| b.0.cmp(&a.0));

        let mut out = String::from("#");
        for (field, value) in sorted {
            out.push_str(field);
            out.push(':');
            out.push_str(&self.hash(value));
            out.push(',');
        }
        out
    }

    fn hash_opaque(&self, opaque: &OpaqueValue) -> String {
        let addr = Arc::as_ptr(&opaque.0) as *const () as usize;
        let mut table = self.table.lock();
        if let Some(hash) = table.lookup(addr) {
            return hash;
        }
        table.assign(addr, Arc::downgrade(&opaque.0))
    }

    fn hash_shared(&self, shared: &SharedValue) -> String {
        let addr = Arc::as_ptr(&shared.0) as *const () as usize;
        {
            let mut table = self.table.lock();
            if let Some(hash) = table.lookup(addr) {
                return hash;
            }
            let owner: Arc<dyn Any + Send + Sync> = shared.0.clone();
            table.assign(addr, Arc::downgrade(&owner));
        }

        // The table lock is released: recursion may hash other nodes, and a
        // cycle back to this node now hits the token.
        let hash = self.hash(&shared.0.read());
        self.table.lock().record(addr, hash.clone());
        hash
    }
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn hash(value: impl Into<KeyValue>) -> String {
        StableHasher::new().hash(&value.into())
    }

    #[test]
    fn test_primitives_are_type_tagged() {
        assert_eq!(hash(KeyValue::array(["key"])), r#"@"key","#);
        assert_eq!(hash(KeyValue::array([1])), "@1,");
        assert_eq!(hash(KeyValue::array(["false"])), r#"@"false","#);
        assert_eq!(hash(KeyValue::array([false])), "@false,");
        assert_eq!(hash(KeyValue::Array(vec![KeyValue::Null])), "@null,");
        assert_eq!(hash(KeyValue::array(["null"])), r#"@"null","#);
        assert_eq!(hash(KeyValue::Array(vec![KeyValue::Undefined])), "@undefined,");
        assert_eq!(hash(KeyValue::array([f64::NAN])), "@NaN,");
        assert_eq!(hash(KeyValue::array([f64::INFINITY])), "@Infinity,");
        assert_eq!(hash(KeyValue::array([""])), r#"@"","#);
        assert_eq!(hash(1.5), "1.5");
        assert_ne!(hash(1), hash("1"));
    }

    #[test]
    fn test_quotes_are_escaped() {
        assert_ne!(
            hash(KeyValue::Array(vec!["\",\"".into(), 1.into()])),
            hash(KeyValue::Array(vec!["".into(), "".into(), 1.into()]))
        );
    }

    #[test]
    fn test_dates_hash_to_iso_string() {
        let date = Utc.timestamp_millis_opt(1234).unwrap();
        assert_eq!(hash(date), "1970-01-01T00:00:01.234Z");
        assert_eq!(hash(KeyValue::array([date])), hash(KeyValue::array([date])));
    }

    #[test]
    fn test_objects_and_nesting() {
        assert_eq!(hash(KeyValue::array([KeyValue::object([("x", 1)])])), "@#x:1,,");
        assert_eq!(hash(KeyValue::array([KeyValue::object([("", 1)])])), "@#:1,,");
        assert_eq!(
            hash(KeyValue::array([KeyValue::object([(
                "x",
                KeyValue::object([("y", 2)])
            )])])),
            "@#x:#y:2,,,"
        );
        assert_eq!(hash(KeyValue::array([KeyValue::Array(vec![])])), "@@,");
        assert_ne!(
            hash(KeyValue::array([KeyValue::array([KeyValue::Array(vec![])])])),
            hash(KeyValue::array([KeyValue::Array(vec![]), KeyValue::Array(vec![])]))
        );
    }

    #[test]
    fn test_undefined_fields_are_skipped() {
        assert_eq!(
            hash(KeyValue::object([("a", KeyValue::Int(1)), ("b", KeyValue::Undefined)])),
            hash(KeyValue::object([("a", 1)]))
        );
    }

    #[test]
    fn test_opaque_values_hash_by_identity() {
        let hasher = StableHasher::new();
        let handle = Arc::new(String::from("connection"));
        let same = KeyValue::opaque(handle.clone());

        assert_eq!(hasher.hash(&same), hasher.hash(&KeyValue::opaque(handle)));
        assert_ne!(
            hasher.hash(&same),
            hasher.hash(&KeyValue::opaque(Arc::new(String::from("connection"))))
        );
    }

    #[test]
    fn test_circular_references_terminate() {
        let hasher = StableHasher::new();

        let node = SharedValue::new(KeyValue::object(Vec::<(String, KeyValue)>::new()));
        node.insert("o", node.clone().into());
        let circular = KeyValue::array([node.clone()]);
        assert_eq!(hasher.hash(&circular), hasher.hash(&circular));
        assert_ne!(
            hasher.hash(&circular),
            hasher.hash(&KeyValue::array([KeyValue::object(
                Vec::<(String, KeyValue)>::new()
            )]))
        );

        let list = SharedValue::new(KeyValue::Array(vec![]));
        list.push(list.clone().into());
        let circular = KeyValue::array([list.clone()]);
        assert_eq!(hasher.hash(&circular), hasher.hash(&circular));
        assert_ne!(
            hasher.hash(&circular),
            hasher.hash(&KeyValue::array([KeyValue::Array(vec![])]))
        );
    }

    #[test]
    fn test_dead_tokens_are_pruned() {
        let hasher = StableHasher::new();
        for i in 0..(PRUNE_THRESHOLD + 10) {
            hasher.hash(&KeyValue::opaque(Arc::new(i)));
        }
        assert!(hasher.tracked() < PRUNE_THRESHOLD);
    }

    #[test]
    fn test_repeated_hash_is_stable() {
        let hasher = StableHasher::new();
        let value = KeyValue::Array(vec![1.into(), "a".into(), KeyValue::object([("x", 1)])]);
        assert_eq!(hasher.hash(&value), hasher.hash(&value));
    }

    proptest! {
        #[test]
        fn prop_object_hash_ignores_insertion_order(
            fields in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8)
        ) {
            let forward: Vec<_> = fields.iter().map(|(k, v)| (k.clone(), *v)).collect();
            let mut backward = forward.clone();
            backward.reverse();

            let hasher = StableHasher::new();
            prop_assert_eq!(
                hasher.hash(&KeyValue::object(forward)),
                hasher.hash(&KeyValue::object(backward))
            );
        }
    }
}
