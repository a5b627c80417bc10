//! Saga log for the coupon issuance pipeline.
//!
//! Here "saga" is an audit-and-retry log for one asynchronous operation,
//! not a two-phase distributed transaction. The producer writes a PENDING
//! row before publishing; the consumer moves it to SUCCESS or FAILED
//! exactly once. The log is the mechanism by which a human or a
//! reconciliation job can find stuck PENDING events, independent of the
//! grant table.
//!
//! Ownership: the request path creates rows, the consumer path mutates
//! them. No two writers ever touch the same `event_id` concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::CouponId;

/// Retry cap for transient consumer failures.
pub const MAX_SAGA_RETRIES: u32 = 3;

/// Lifecycle state of an issuance event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Published by the producer, not yet processed.
    Pending,
    /// The grant was persisted.
    Success,
    /// Rejected or retries exhausted; `error_message` says why.
    Failed,
}

/// The message published to the coupon issuance topic.
///
/// Field names are the wire contract for `coupon-issue-events`; the
/// partition key is `member_email`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponIssueMessage {
    /// Unique event id (UUID v4).
    pub event_id: String,
    /// Claiming member.
    pub member_email: String,
    /// Coupon code being claimed.
    pub coupon_code: String,
    /// Coupon id, resolved by the producer.
    pub coupon_id: CouponId,
    /// When the producer built the message.
    pub timestamp: DateTime<Utc>,
    /// Lifecycle status at time of (re)delivery.
    pub status: SagaStatus,
    /// Failure reason, if any.
    pub error_message: Option<String>,
    /// Transient-failure attempts so far.
    pub retry_count: u32,
}

impl CouponIssueMessage {
    /// Build a fresh PENDING message with the given event id.
    #[must_use]
    pub fn pending(
        event_id: String,
        member_email: impl Into<String>,
        coupon_code: impl Into<String>,
        coupon_id: CouponId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            member_email: member_email.into(),
            coupon_code: coupon_code.into(),
            coupon_id,
            timestamp,
            status: SagaStatus::Pending,
            error_message: None,
            retry_count: 0,
        }
    }

    /// Count a failed attempt.
    pub const fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Whether another transient-failure attempt is allowed.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry_count < MAX_SAGA_RETRIES
    }
}

/// Durable audit row for one issuance event.
///
/// Immutable after creation except for the status fields, which transition
/// PENDING to SUCCESS or FAILED exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaEvent {
    /// Unique event id; the row key.
    pub event_id: String,
    /// Claiming member.
    pub member_email: String,
    /// Coupon code.
    pub coupon_code: String,
    /// Coupon id.
    pub coupon_id: CouponId,
    /// Current lifecycle state.
    pub status: SagaStatus,
    /// Failure reason when `status` is FAILED.
    pub error_message: Option<String>,
    /// Transient-failure attempts consumed.
    pub retry_count: u32,
    /// Producer-side event time.
    pub timestamp: DateTime<Utc>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl SagaEvent {
    /// Snapshot a message into a saga row.
    #[must_use]
    pub fn from_message(message: &CouponIssueMessage, now: DateTime<Utc>) -> Self {
        Self {
            event_id: message.event_id.clone(),
            member_email: message.member_email.clone(),
            coupon_code: message.coupon_code.clone(),
            coupon_id: message.coupon_id,
            status: message.status,
            error_message: message.error_message.clone(),
            retry_count: message.retry_count,
            timestamp: message.timestamp,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the terminal SUCCESS transition.
    pub fn mark_success(&mut self, now: DateTime<Utc>) {
        self.status = SagaStatus::Success;
        self.error_message = None;
        self.updated_at = now;
    }

    /// Record the terminal FAILED transition with a reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = SagaStatus::Failed;
        self.error_message = Some(reason.into());
        self.updated_at = now;
    }

    /// Whether the row reached SUCCESS or FAILED.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self.status, SagaStatus::Pending)
    }
}
