//! Request-path producer for the coupon issuance pipeline.
//!
//! The producer does only the cheap synchronous work: validate the claim,
//! record a PENDING saga row, publish. The caller gets the event id back
//! immediately and polls the saga row or their grants for the outcome.
//! Keying the message by member email keeps one member's claims on one
//! partition, so redeliveries and retries for a member stay ordered.

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use flashsale_core::broker::{BrokerMessage, COUPON_ISSUE_TOPIC, MessageBroker};
use flashsale_core::counter::{CounterStore, coupon_issued_key};
use flashsale_core::environment::Clock;
use flashsale_core::error::CoreError;
use flashsale_core::saga::{CouponIssueMessage, SagaEvent};
use flashsale_core::store::{CouponStore, GrantStore, MemberStore, SagaStore, StoreError};

use super::{CouponIssuance, IssuanceOutcome};

/// Validates claims and publishes them to `coupon-issue-events`.
#[derive(Clone)]
pub struct CouponIssueProducer {
    members: Arc<dyn MemberStore>,
    coupons: Arc<dyn CouponStore>,
    grants: Arc<dyn GrantStore>,
    sagas: Arc<dyn SagaStore>,
    counters: Arc<dyn CounterStore>,
    broker: Arc<dyn MessageBroker>,
    clock: Arc<dyn Clock>,
}

impl CouponIssueProducer {
    /// Wire up a producer.
    #[must_use]
    pub fn new(
        members: Arc<dyn MemberStore>,
        coupons: Arc<dyn CouponStore>,
        grants: Arc<dyn GrantStore>,
        sagas: Arc<dyn SagaStore>,
        counters: Arc<dyn CounterStore>,
        broker: Arc<dyn MessageBroker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            members,
            coupons,
            grants,
            sagas,
            counters,
            broker,
            clock,
        }
    }

    /// Validate a claim and hand it to the pipeline, returning the event id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown member or coupon
    /// code, [`CoreError::CouponUnavailable`] for an inactive or expired
    /// coupon, [`CoreError::AlreadyIssued`] when the member already holds
    /// it, and [`CoreError::Transient`] if the saga write or publish fails.
    #[instrument(skip(self))]
    pub async fn issue_coupon_auto(
        &self,
        email: &str,
        coupon_code: &str,
    ) -> Result<String, CoreError> {
        let member = self.members.find(email).await.map_err(|err| match err {
            StoreError::NotFound(_) => CoreError::NotFound(format!("member '{email}'")),
            other => CoreError::from(other),
        })?;
        let coupon = self
            .coupons
            .find_by_code(coupon_code)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => {
                    CoreError::NotFound(format!("coupon code '{coupon_code}'"))
                },
                other => CoreError::from(other),
            })?;

        let now = self.clock.now();
        if !coupon.is_available(now) {
            return Err(CoreError::CouponUnavailable {
                coupon_code: coupon_code.to_string(),
            });
        }

        let marker = coupon_issued_key(coupon.id, &member.email);
        if self.counters.has_marker(&marker).await? || self.grants.exists(email, coupon_code).await?
        {
            return Err(CoreError::AlreadyIssued {
                email: email.to_string(),
                coupon_code: coupon_code.to_string(),
            });
        }

        let event_id = Uuid::new_v4().to_string();
        let message =
            CouponIssueMessage::pending(event_id.clone(), email, coupon_code, coupon.id, now);

        // The PENDING row goes in before the publish so a crash in between
        // leaves a visible stuck event rather than a silent loss.
        self.sagas
            .upsert(SagaEvent::from_message(&message, now))
            .await?;

        let wire = BrokerMessage::json(Some(email.to_string()), &event_id, now, &message)?;
        self.broker.publish(COUPON_ISSUE_TOPIC, &wire).await?;

        info!(event_id, email, coupon_code, "coupon claim accepted");
        Ok(event_id)
    }
}

impl CouponIssuance for CouponIssueProducer {
    fn issue_coupon(
        &self,
        email: &str,
        coupon_code: &str,
    ) -> BoxFuture<'_, Result<IssuanceOutcome, CoreError>> {
        let email = email.to_string();
        let coupon_code = coupon_code.to_string();
        Box::pin(async move {
            let event_id = self.issue_coupon_auto(&email, &coupon_code).await?;
            Ok(IssuanceOutcome::Accepted { event_id })
        })
    }
}
