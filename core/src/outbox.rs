//! Transactional outbox records.
//!
//! A domain event is first written as a PENDING row in the same durable
//! unit as the business state change it describes, then published to the
//! broker by a background publisher. This is the only supported way to emit
//! a cross-system event: the event cannot be lost if the process crashes
//! between the business commit and the publish.
//!
//! Rows are mutated only by the outbox publisher. Terminal states are
//! PUBLISHED, or FAILED with the retry budget consumed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retry cap for failed publishes.
pub const MAX_OUTBOX_RETRIES: u32 = 3;

/// Delivery state of an outbox row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Written, not yet published.
    Pending,
    /// Delivered to the broker.
    Published,
    /// A publish attempt failed; terminal once `retry_count` hits the cap.
    Failed,
}

/// One durably recorded domain event awaiting publication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Monotonic row id assigned by the store.
    pub id: u64,
    /// Destination topic; outbox topics are named by event type.
    pub event_type: String,
    /// Unique event id (UUID v4), carried as a broker header.
    pub event_id: String,
    /// JSON-serialized domain payload.
    pub payload: String,
    /// Delivery state.
    pub status: OutboxStatus,
    /// Failed publish attempts so far.
    pub retry_count: u32,
    /// Failure reason from the most recent attempt.
    pub error_message: Option<String>,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
    /// When the row reached PUBLISHED.
    pub published_at: Option<DateTime<Utc>>,
    /// When the row last entered FAILED.
    pub failed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Build a fresh PENDING row; the store assigns `id` on append.
    #[must_use]
    pub fn pending(
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        payload: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            event_type: event_type.into(),
            event_id: event_id.into(),
            payload: payload.into(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now,
            published_at: None,
            failed_at: None,
        }
    }

    /// Record successful delivery.
    pub fn mark_published(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Published;
        self.published_at = Some(now);
    }

    /// Record a failed publish attempt.
    ///
    /// The row stays retriable until [`MAX_OUTBOX_RETRIES`] attempts have
    /// been consumed, after which it is terminal.
    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.status = OutboxStatus::Failed;
        self.error_message = Some(reason.into());
        self.failed_at = Some(now);
    }

    /// Whether the publisher may try this row again.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry_count < MAX_OUTBOX_RETRIES
    }

    /// Whether the row is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self.status {
            OutboxStatus::Published => true,
            OutboxStatus::Failed => !self.can_retry(),
            OutboxStatus::Pending => false,
        }
    }
}
