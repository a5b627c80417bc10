//! Distributed lock abstraction.
//!
//! A named, leased mutual-exclusion lock coordinated through an external
//! store (Redisson over Redis in production). Exactly one caller across the
//! whole distributed system holds a given key for the lease window; the
//! lease auto-expires so a crashed holder cannot block others permanently.
//!
//! Callers must keep their critical sections short relative to the lease:
//! the design accepts lease expiry mid-action as an out-of-scope hazard
//! rather than attempting cooperative cancellation.

use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

use crate::domain::ProductId;

/// Key for the per-product distributed lock.
#[must_use]
pub fn product_lock_key(product_id: ProductId) -> String {
    format!("product:lock:{product_id}")
}

/// Errors from lock acquisition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The lock was not acquired within the wait timeout.
    #[error("lock '{key}' not acquired within {wait_ms}ms")]
    Timeout {
        /// The contended key.
        key: String,
        /// How long the caller waited.
        wait_ms: u64,
    },

    /// The lock backend could not be reached.
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// A held lock. Dropping the guard releases the lock.
///
/// Release is idempotent with respect to lease expiry: if the lease already
/// lapsed and another caller took the key, dropping this guard must not
/// release the new holder's lock.
pub struct LockGuard {
    inner: Box<dyn LockHandle>,
}

impl LockGuard {
    /// Wrap a provider-specific handle.
    #[must_use]
    pub fn new(inner: Box<dyn LockHandle>) -> Self {
        Self { inner }
    }

    /// The key this guard holds.
    #[must_use]
    pub fn key(&self) -> &str {
        self.inner.key()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key()).finish()
    }
}

/// Provider-specific held-lock state.
pub trait LockHandle: Send {
    /// The key this handle holds.
    fn key(&self) -> &str;

    /// Release the lock if this handle still owns it.
    ///
    /// Must be safe to call after lease expiry (no-op in that case) and
    /// must not block; called from `Drop`.
    fn release(&mut self);
}

/// Acquires named, leased locks.
pub trait LockProvider: Send + Sync {
    /// Try to acquire `key` within `wait`; the lock auto-expires after
    /// `lease` if not released sooner.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] if another holder kept the key for the
    ///   whole wait window.
    /// - [`LockError::Backend`] if the lock store is unreachable.
    fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> BoxFuture<'_, Result<LockGuard, LockError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_lock_key_layout() {
        assert_eq!(product_lock_key(ProductId(9)), "product:lock:9");
    }
}
