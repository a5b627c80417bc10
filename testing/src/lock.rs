//! In-memory distributed lock provider.
//!
//! Single-process stand-in for Redisson: one holder per key, bounded wait
//! with short polling, and a lease deadline after which the key can be
//! stolen by the next acquirer. Release after lease expiry is a no-op so a
//! stale guard never evicts the new holder.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use flashsale_core::lock::{LockError, LockGuard, LockHandle, LockProvider};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy)]
struct Held {
    token: u64,
    lease_deadline: Instant,
}

type LockTable = Arc<Mutex<HashMap<String, Held>>>;

fn with_table<T>(table: &LockTable, f: impl FnOnce(&mut HashMap<String, Held>) -> T) -> T {
    let mut map = match table.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut map)
}

/// In-memory [`LockProvider`] with lease expiry.
#[derive(Debug, Default)]
pub struct InMemoryLockProvider {
    table: LockTable,
    next_token: AtomicU64,
}

impl InMemoryLockProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held (lease not yet expired).
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        with_table(&self.table, |map| {
            map.get(key)
                .is_some_and(|held| Instant::now() < held.lease_deadline)
        })
    }

    fn attempt(&self, key: &str, lease: Duration) -> Option<u64> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        with_table(&self.table, |map| {
            let now = Instant::now();
            match map.get(key) {
                Some(held) if now < held.lease_deadline => None,
                _ => {
                    map.insert(
                        key.to_string(),
                        Held {
                            token,
                            lease_deadline: now + lease,
                        },
                    );
                    Some(token)
                },
            }
        })
    }
}

impl LockProvider for InMemoryLockProvider {
    fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> BoxFuture<'_, Result<LockGuard, LockError>> {
        let key = key.to_string();
        Box::pin(async move {
            let deadline = Instant::now() + wait;
            loop {
                if let Some(token) = self.attempt(&key, lease) {
                    return Ok(LockGuard::new(Box::new(InMemoryLockHandle {
                        key,
                        token,
                        table: Arc::clone(&self.table),
                    })));
                }
                if Instant::now() >= deadline {
                    return Err(LockError::Timeout {
                        key,
                        wait_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
    }
}

struct InMemoryLockHandle {
    key: String,
    token: u64,
    table: LockTable,
}

impl LockHandle for InMemoryLockHandle {
    fn key(&self) -> &str {
        &self.key
    }

    fn release(&mut self) {
        with_table(&self.table, |map| {
            // Only remove the entry if this handle still owns it; after
            // lease expiry another caller may hold the key.
            if map.get(&self.key).is_some_and(|held| held.token == self.token) {
                map.remove(&self.key);
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);
    const LEASE: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let provider = InMemoryLockProvider::new();
        let guard = provider.try_acquire("k", WAIT, LEASE).await.unwrap();
        assert!(provider.is_held("k"));

        let err = provider.try_acquire("k", WAIT, LEASE).await.unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        drop(guard);
        assert!(!provider.is_held("k"));
        let _reacquired = provider.try_acquire("k", WAIT, LEASE).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lease_can_be_stolen() {
        let provider = InMemoryLockProvider::new();
        let stale = provider
            .try_acquire("k", WAIT, Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = provider
            .try_acquire("k", WAIT, LEASE)
            .await
            .expect("expired lease should be acquirable");

        // The stale guard must not evict the new holder.
        drop(stale);
        assert!(provider.is_held("k"));
        drop(fresh);
        assert!(!provider.is_held("k"));
    }

    #[tokio::test]
    async fn independent_keys_do_not_contend() {
        let provider = InMemoryLockProvider::new();
        let _a = provider.try_acquire("a", WAIT, LEASE).await.unwrap();
        let _b = provider.try_acquire("b", WAIT, LEASE).await.unwrap();
    }
}
