use futures::FutureExt;
use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swr_engine::{BoxError, KeyArgs, KeyValue};

/// Test data structure for benchmarks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchUser {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub score: u32,
}

impl BenchUser {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            name: format!("User {}", id),
            email: format!("user{}@example.com", id),
            score: (id % 1000) as u32,
        }
    }
}

/// Simulated backend with configurable latency
#[derive(Clone)]
pub struct FakeDatabase {
    data: Arc<HashMap<u64, BenchUser>>,
    latency_ms: u64,
    query_count: Arc<AtomicUsize>,
}

impl FakeDatabase {
    pub fn new(num_users: usize, latency_ms: u64) -> Self {
        let data = (0..num_users as u64)
            .map(|id| (id, BenchUser::new(id)))
            .collect();

        Self {
            data: Arc::new(data),
            latency_ms,
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn get(&self, id: u64) -> Option<BenchUser> {
        self.query_count.fetch_add(1, Ordering::Relaxed);

        // Simulate backend latency
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        self.data.get(&id).cloned()
    }

    /// A fetcher for `["/api/user", id]` keys.
    pub fn fetcher(
        &self,
    ) -> impl Fn(KeyArgs) -> BoxFuture<'static, Result<BenchUser, BoxError>> + Send + Sync + 'static
    {
        let db = self.clone();
        move |args| {
            let db = db.clone();
            let id = args.get(1).and_then(KeyValue::as_i64).unwrap_or(-1);
            async move {
                let id = u64::try_from(id).map_err(|_| BoxError::from("bad id"))?;
                db.get(id).await.ok_or_else(|| BoxError::from("user not found"))
            }
            .boxed()
        }
    }

    #[allow(dead_code)]
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }

    #[allow(dead_code)]
    pub fn reset_count(&self) {
        self.query_count.store(0, Ordering::Relaxed);
    }
}

/// Generate test keys for different workload patterns
pub struct KeyGenerator {
    num_keys: usize,
}

impl KeyGenerator {
    pub fn new(num_keys: usize) -> Self {
        Self { num_keys }
    }

    fn key(id: usize) -> [KeyValue; 2] {
        [KeyValue::from("/api/user"), KeyValue::from(id as u64)]
    }

    /// Generate sequential keys (for cold cache tests)
    pub fn sequential(&self) -> Vec<[KeyValue; 2]> {
        (0..self.num_keys).map(Self::key).collect()
    }

    /// Generate random keys with uniform distribution
    #[allow(dead_code)]
    pub fn uniform_random(&self, count: usize) -> Vec<[KeyValue; 2]> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| Self::key(rng.gen_range(0..self.num_keys)))
            .collect()
    }

    /// Generate keys with Zipf distribution (realistic - few hot keys)
    pub fn zipf_random(&self, count: usize) -> Vec<[KeyValue; 2]> {
        let mut rng = rand::thread_rng();
        let mut keys = Vec::with_capacity(count);

        for _ in 0..count {
            // Simplified Zipf: 80% of requests go to 20% of keys
            let key_id = if rng.gen_bool(0.8) {
                rng.gen_range(0..(self.num_keys / 5))
            } else {
                rng.gen_range((self.num_keys / 5)..self.num_keys)
            };
            keys.push(Self::key(key_id));
        }

        keys
    }

    /// Object-shaped keys with a random field order, for hashing.
    pub fn records(&self, count: usize) -> Vec<KeyValue> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| {
                let id = KeyValue::from(rng.gen_range(0..self.num_keys) as u64);
                let page = KeyValue::from(rng.gen_range(0..50u32));
                let fields = [("id", id), ("page", page), ("sort", KeyValue::from("name"))];
                if rng.gen_bool(0.5) {
                    KeyValue::object(fields)
                } else {
                    KeyValue::object(fields.into_iter().rev())
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_fake_database() {
        use super::FakeDatabase;

        let db = FakeDatabase::new(100, 10);

        let user = db.get(0).await;
        assert!(user.is_some());
        assert_eq!(user.unwrap().id, 0);

        assert_eq!(db.query_count(), 1);
    }

    #[test]
    fn test_key_generator() {
        use super::KeyGenerator;

        let key_gen = KeyGenerator::new(100);

        let seq = key_gen.sequential();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq[0][1].as_i64(), Some(0));

        let uniform = key_gen.uniform_random(50);
        assert_eq!(uniform.len(), 50);

        let zipf = key_gen.zipf_random(100);
        assert_eq!(zipf.len(), 100);

        assert_eq!(key_gen.records(10).len(), 10);
    }
}
