//! Error taxonomy for the allocation core.
//!
//! Every fallible operation in the system resolves into one of these
//! categories, which determines how the failure propagates:
//!
//! - Synchronous rejections ([`CoreError::ResourceBusy`],
//!   [`CoreError::InsufficientStock`], [`CoreError::AlreadyIssued`],
//!   [`CoreError::CouponUnavailable`], [`CoreError::NotFound`]) surface
//!   directly to the request path and are never retried internally.
//! - [`CoreError::Transient`] marks infrastructure hiccups that the
//!   pipeline retries up to its attempt cap.
//! - [`CoreError::RetryExhausted`] is terminal. It is recorded in the
//!   saga or outbox row and never thrown further up.

use thiserror::Error;

use crate::domain::ProductId;

/// Unified error type for lock, stock, coupon, and outbox operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The named lock could not be acquired within the wait timeout.
    ///
    /// Retriable by the caller; the lock service never retries internally.
    #[error("'{key}' is currently being processed by another request, retry shortly")]
    ResourceBusy {
        /// The lock key that was contended.
        key: String,
    },

    /// A reservation would drive product stock below zero.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// The product whose stock ran short.
        product_id: ProductId,
        /// Quantity the caller asked for.
        requested: u32,
        /// Stock remaining at the time of the check.
        available: u32,
    },

    /// The member already holds a grant for this coupon.
    #[error("coupon '{coupon_code}' already issued to '{email}'")]
    AlreadyIssued {
        /// Member email.
        email: String,
        /// Coupon code.
        coupon_code: String,
    },

    /// The coupon is inactive or past its end date.
    #[error("coupon '{coupon_code}' is not available")]
    CouponUnavailable {
        /// Coupon code.
        coupon_code: String,
    },

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An infrastructure failure that may succeed on retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// All retry attempts were consumed without success.
    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Attempts made before giving up.
        attempts: u32,
        /// The error observed on the final attempt.
        last_error: String,
    },

    /// A payload could not be serialized or deserialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Whether the consumer/publisher should retry after this error.
    ///
    /// Business rejections are final; only infrastructure hiccups qualify.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<crate::store::StoreError> for CoreError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<crate::counter::CounterError> for CoreError {
    fn from(err: crate::counter::CounterError) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<crate::broker::BrokerError> for CoreError {
    fn from(err: crate::broker::BrokerError) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<crate::lock::LockError> for CoreError {
    fn from(err: crate::lock::LockError) -> Self {
        match err {
            crate::lock::LockError::Timeout { key, .. } => Self::ResourceBusy { key },
            crate::lock::LockError::Backend(reason) => Self::Transient(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_busy_message_tells_caller_to_retry() {
        let err = CoreError::ResourceBusy {
            key: "product:lock:7".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("currently being processed by another request"));
        assert!(msg.contains("retry shortly"));
    }

    #[test]
    fn only_transient_errors_are_retriable() {
        assert!(CoreError::Transient("connection reset".into()).is_retriable());
        assert!(
            !CoreError::AlreadyIssued {
                email: "a@b.c".into(),
                coupon_code: "WELCOME".into()
            }
            .is_retriable()
        );
        assert!(
            !CoreError::InsufficientStock {
                product_id: ProductId(1),
                requested: 5,
                available: 3
            }
            .is_retriable()
        );
    }
}
