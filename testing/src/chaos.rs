//! Fault-injecting wrappers for retry-path tests.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flashsale_core::broker::{BrokerError, BrokerMessage, MessageBroker, MessageStream};
use flashsale_core::domain::MemberCoupon;
use flashsale_core::store::{GrantStore, StoreError};

/// A broker whose first `n` publishes fail with a transport error.
///
/// Subscriptions pass through untouched.
pub struct FlakyBroker {
    inner: Arc<dyn MessageBroker>,
    failures_left: AtomicUsize,
}

impl FlakyBroker {
    /// Wrap `inner`, failing the next `failures` publish calls.
    #[must_use]
    pub fn new(inner: Arc<dyn MessageBroker>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl MessageBroker for FlakyBroker {
    fn publish(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> BoxFuture<'_, Result<(), BrokerError>> {
        if self.take_failure() {
            let topic = topic.to_string();
            return Box::pin(async move {
                Err(BrokerError::PublishFailed {
                    topic,
                    reason: "injected failure".to_string(),
                })
            });
        }
        self.inner.publish(topic, message)
    }

    fn subscribe(&self, topics: &[&str]) -> BoxFuture<'_, Result<MessageStream, BrokerError>> {
        self.inner.subscribe(topics)
    }
}

/// A grant store whose first `n` inserts fail with a backend error.
///
/// Reads pass through untouched, so dedup checks still see real state.
pub struct FlakyGrantStore {
    inner: Arc<dyn GrantStore>,
    failures_left: AtomicUsize,
}

impl FlakyGrantStore {
    /// Wrap `inner`, failing the next `failures` insert calls.
    #[must_use]
    pub fn new(inner: Arc<dyn GrantStore>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl GrantStore for FlakyGrantStore {
    fn exists(&self, email: &str, coupon_code: &str) -> BoxFuture<'_, Result<bool, StoreError>> {
        self.inner.exists(email, coupon_code)
    }

    fn insert(&self, grant: MemberCoupon) -> BoxFuture<'_, Result<MemberCoupon, StoreError>> {
        if self.take_failure() {
            return Box::pin(async {
                Err(StoreError::Backend("injected failure".to_string()))
            });
        }
        self.inner.insert(grant)
    }

    fn list_for_member(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Vec<MemberCoupon>, StoreError>> {
        self.inner.list_for_member(email)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use chrono::Utc;

    fn msg() -> BrokerMessage {
        BrokerMessage {
            key: None,
            event_id: "evt-1".to_string(),
            timestamp: Utc::now(),
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn fails_exactly_n_times_then_recovers() {
        let inner = Arc::new(InMemoryBroker::new());
        let flaky = FlakyBroker::new(Arc::clone(&inner) as Arc<dyn MessageBroker>, 2);

        assert!(flaky.publish("t", &msg()).await.is_err());
        assert!(flaky.publish("t", &msg()).await.is_err());
        assert!(flaky.publish("t", &msg()).await.is_ok());
        assert_eq!(inner.published_to("t").len(), 1);
    }
}
