//! Atomic counter store abstraction.
//!
//! The counter store is the external key/value service (Redis in
//! production) that backs coupon stock counters and issuance dedup markers.
//! Every mutation is a single atomic operation; callers never
//! read-modify-write.
//!
//! # Key layout
//!
//! - `coupon:stock:{couponId}` - remaining stock, integer, 30 day TTL
//! - `coupon:issued:{couponId}:{email}` - dedup marker, 30 day TTL
//!
//! # Exhaustion semantics
//!
//! [`CounterStore::decrement`] on a missing key treats the value as zero, so
//! the result goes negative. A negative result after decrement means the
//! stock is exhausted; the decrement is deliberately not undone, matching
//! first-come-first-served semantics where a loser's attempt still consumed
//! a slot in the race.

use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

use crate::domain::CouponId;

/// Safety-net TTL for stock counters and dedup markers (30 days).
pub const COUNTER_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Key for a coupon's remaining-stock counter.
#[must_use]
pub fn coupon_stock_key(coupon_id: CouponId) -> String {
    format!("coupon:stock:{coupon_id}")
}

/// Key for the per-member issuance dedup marker.
#[must_use]
pub fn coupon_issued_key(coupon_id: CouponId, email: &str) -> String {
    format!("coupon:issued:{coupon_id}:{email}")
}

/// Errors from the counter store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// The store could not be reached or the command failed.
    #[error("counter store backend error: {0}")]
    Backend(String),
}

/// Atomic integer store with key expiry.
///
/// Implementations must guarantee that `decrement` and `increment` are
/// atomic across all concurrent callers in the distributed system; two
/// simultaneous decrements from 1 must yield 0 and -1, never 0 twice.
pub trait CounterStore: Send + Sync {
    /// Set `key` to `value` with a TTL, overwriting any existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Backend`] if the store is unreachable.
    fn set(&self, key: &str, value: i64, ttl: Duration)
    -> BoxFuture<'_, Result<(), CounterError>>;

    /// Read the current value, `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Backend`] if the store is unreachable.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<i64>, CounterError>>;

    /// Atomically decrement and return the new value.
    ///
    /// A missing key counts as zero, so the first decrement of an
    /// uninitialized key returns -1.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Backend`] if the store is unreachable.
    fn decrement(&self, key: &str) -> BoxFuture<'_, Result<i64, CounterError>>;

    /// Atomically increment and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Backend`] if the store is unreachable.
    fn increment(&self, key: &str) -> BoxFuture<'_, Result<i64, CounterError>>;

    /// Write a presence marker under `key` with a TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Backend`] if the store is unreachable.
    fn put_marker(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<(), CounterError>>;

    /// Whether a non-expired marker exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Backend`] if the store is unreachable.
    fn has_marker(&self, key: &str) -> BoxFuture<'_, Result<bool, CounterError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_matches_external_interface() {
        assert_eq!(coupon_stock_key(CouponId(42)), "coupon:stock:42");
        assert_eq!(
            coupon_issued_key(CouponId(42), "user@example.com"),
            "coupon:issued:42:user@example.com"
        );
    }

    #[test]
    fn ttl_is_thirty_days() {
        assert_eq!(COUNTER_TTL.as_secs(), 30 * 24 * 60 * 60);
    }
}
