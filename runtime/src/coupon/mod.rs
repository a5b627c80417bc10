//! Coupon issuance.
//!
//! Two paths issue coupons behind one [`CouponIssuance`] interface:
//!
//! - [`sync::SyncCouponService`]: validate, decrement the atomic stock
//!   counter, and persist the grant in the calling task.
//! - [`producer::CouponIssueProducer`] + [`consumer::CouponIssueConsumer`]:
//!   the producer validates, records a PENDING saga row, and publishes to
//!   `coupon-issue-events`; the batching consumer grants asynchronously and
//!   records the terminal outcome.
//!
//! Both paths share the exhaustion rule: the counter decrement that goes
//! negative is never undone, so a sold-out coupon stays visibly sold out.

pub mod consumer;
pub mod producer;
pub mod sync;

use futures::future::BoxFuture;

use flashsale_core::domain::MemberCoupon;
use flashsale_core::error::CoreError;

/// Result of a claim accepted by either issuance path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssuanceOutcome {
    /// The grant was persisted before returning (sync path).
    Granted(MemberCoupon),
    /// The claim was published; poll the saga row or the member's grants
    /// for the outcome (async path).
    Accepted {
        /// Event id to track the claim by.
        event_id: String,
    },
}

/// A coupon claim entry point.
pub trait CouponIssuance: Send + Sync {
    /// Claim `coupon_code` for the member with `email`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown member or code,
    /// [`CoreError::CouponUnavailable`] for an inactive, expired, or
    /// exhausted coupon, and [`CoreError::AlreadyIssued`] when the member
    /// already holds it.
    fn issue_coupon(
        &self,
        email: &str,
        coupon_code: &str,
    ) -> BoxFuture<'_, Result<IssuanceOutcome, CoreError>>;
}
