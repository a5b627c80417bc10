//! Tuning knobs for the runtime services.
//!
//! Every duration and cap the services consult lives here with the
//! production default. Tests shrink the intervals to keep runs fast; the
//! semantics never depend on the exact values.

use std::time::Duration;

/// How checkout reserves stock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LockStrategy {
    /// Pessimistic row lock held for the duration of the reservation.
    #[default]
    RowLock,
    /// Named distributed lock per product, row writes flushed inside it.
    Distributed,
}

/// How coupon claims are issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IssuanceMode {
    /// Validate, decrement, and grant in the calling task.
    Sync,
    /// Publish to the issuance topic and grant in the batching consumer.
    #[default]
    Async,
}

/// Named-lock acquisition parameters.
#[derive(Clone, Copy, Debug)]
pub struct LockConfig {
    /// How long an acquirer waits for a contended lock before giving up.
    pub wait: Duration,
    /// How long a holder may keep the lock before it can be stolen.
    pub lease: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(5),
            lease: Duration::from_secs(10),
        }
    }
}

/// Batching consumer parameters.
#[derive(Clone, Copy, Debug)]
pub struct ConsumerConfig {
    /// Queue size at which a batch drains immediately.
    pub batch_size: usize,
    /// Interval at which a non-empty queue drains regardless of size.
    pub flush_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Outbox publisher polling parameters.
#[derive(Clone, Copy, Debug)]
pub struct OutboxConfig {
    /// Poll interval for fresh PENDING rows.
    pub pending_interval: Duration,
    /// Poll interval for FAILED rows with retry budget.
    pub failed_interval: Duration,
    /// Delay before the first FAILED poll, so the two loops interleave.
    pub failed_offset: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            pending_interval: Duration::from_secs(5),
            failed_interval: Duration::from_secs(10),
            failed_offset: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_tuning() {
        let lock = LockConfig::default();
        assert_eq!(lock.wait, Duration::from_secs(5));
        assert_eq!(lock.lease, Duration::from_secs(10));

        let consumer = ConsumerConfig::default();
        assert_eq!(consumer.batch_size, 50);
        assert_eq!(consumer.flush_interval, Duration::from_secs(1));

        let outbox = OutboxConfig::default();
        assert_eq!(outbox.pending_interval, Duration::from_secs(5));
        assert_eq!(outbox.failed_interval, Duration::from_secs(10));
        assert_eq!(outbox.failed_offset, Duration::from_secs(3));
    }
}
