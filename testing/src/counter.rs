//! In-memory atomic counter store.
//!
//! Mirrors the Redis semantics the production store relies on: `DECR` on a
//! missing key treats the value as zero and returns -1, TTLs expire entries
//! lazily on access.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use flashsale_core::counter::{CounterError, CounterStore};

#[derive(Debug, Clone)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

/// In-memory [`CounterStore`] with atomic increments under one mutex.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut entries)
    }

    fn adjust(&self, key: &str, delta: i64) -> i64 {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert(Entry {
                value: 0,
                expires_at: None,
            });
            if !entry.live() {
                entry.value = 0;
                entry.expires_at = None;
            }
            entry.value += delta;
            entry.value
        })
    }
}

impl CounterStore for InMemoryCounterStore {
    fn set(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CounterError>> {
        let key = key.to_string();
        Box::pin(async move {
            self.with_entries(|entries| {
                entries.insert(
                    key,
                    Entry {
                        value,
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
            });
            Ok(())
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<i64>, CounterError>> {
        let key = key.to_string();
        Box::pin(async move {
            Ok(self.with_entries(|entries| {
                entries.get(&key).filter(|e| e.live()).map(|e| e.value)
            }))
        })
    }

    fn decrement(&self, key: &str) -> BoxFuture<'_, Result<i64, CounterError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.adjust(&key, -1)) })
    }

    fn increment(&self, key: &str) -> BoxFuture<'_, Result<i64, CounterError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.adjust(&key, 1)) })
    }

    fn put_marker(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<(), CounterError>> {
        let key = key.to_string();
        Box::pin(async move {
            self.with_entries(|entries| {
                entries.insert(
                    key,
                    Entry {
                        value: 1,
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
            });
            Ok(())
        })
    }

    fn has_marker(&self, key: &str) -> BoxFuture<'_, Result<bool, CounterError>> {
        let key = key.to_string();
        Box::pin(async move {
            Ok(self.with_entries(|entries| entries.get(&key).is_some_and(Entry::live)))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_core::counter::COUNTER_TTL;

    #[tokio::test]
    async fn decrement_of_missing_key_goes_negative() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.decrement("coupon:stock:1").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn seeded_counter_counts_down() {
        let store = InMemoryCounterStore::new();
        store.set("coupon:stock:1", 2, COUNTER_TTL).await.unwrap();
        assert_eq!(store.decrement("coupon:stock:1").await.unwrap(), 1);
        assert_eq!(store.decrement("coupon:stock:1").await.unwrap(), 0);
        assert_eq!(store.decrement("coupon:stock:1").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn markers_exist_until_expiry() {
        let store = InMemoryCounterStore::new();
        assert!(!store.has_marker("coupon:issued:1:a@b.c").await.unwrap());
        store
            .put_marker("coupon:issued:1:a@b.c", COUNTER_TTL)
            .await
            .unwrap();
        assert!(store.has_marker("coupon:issued:1:a@b.c").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_decrements_are_atomic() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryCounterStore::new());
        store.set("k", 100, COUNTER_TTL).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.decrement("k").await }));
        }

        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap().unwrap());
        }
        seen.sort_unstable();
        let expected: Vec<i64> = (0..100).collect();
        assert_eq!(seen, expected);
    }
}
