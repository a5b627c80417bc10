//! Synchronous coupon issuance.
//!
//! The whole claim happens in the calling task: validate, decrement the
//! atomic stock counter, persist the grant. Contention control is the
//! counter itself; there is no lock and no queue, which keeps this path
//! simple enough for low-traffic coupons and for seeding test state.

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{info, instrument};

use flashsale_core::counter::{COUNTER_TTL, CounterStore, coupon_issued_key, coupon_stock_key};
use flashsale_core::domain::{Coupon, CouponId, MemberCoupon};
use flashsale_core::environment::Clock;
use flashsale_core::error::CoreError;
use flashsale_core::store::{CouponStore, GrantStore, MemberStore, StoreError};

use super::{CouponIssuance, IssuanceOutcome};

/// Issues coupons inline, without the broker pipeline.
#[derive(Clone)]
pub struct SyncCouponService {
    members: Arc<dyn MemberStore>,
    coupons: Arc<dyn CouponStore>,
    grants: Arc<dyn GrantStore>,
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl SyncCouponService {
    /// Wire up a service.
    #[must_use]
    pub fn new(
        members: Arc<dyn MemberStore>,
        coupons: Arc<dyn CouponStore>,
        grants: Arc<dyn GrantStore>,
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            members,
            coupons,
            grants,
            counters,
            clock,
        }
    }

    /// Register a coupon and seed its stock counter.
    ///
    /// The counter is the only stock the issuance paths consult, so a
    /// coupon without a seeded counter is exhausted from the start.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] on store or counter failure; a
    /// duplicate code surfaces as [`CoreError::Transient`] from the
    /// store's conflict.
    #[instrument(skip(self, coupon), fields(coupon_code = %coupon.code))]
    pub async fn create_coupon(&self, coupon: Coupon, stock: i64) -> Result<Coupon, CoreError> {
        let coupon = self.coupons.insert(coupon).await?;
        self.counters
            .set(&coupon_stock_key(coupon.id), stock, COUNTER_TTL)
            .await?;
        info!(coupon_code = coupon.code, stock, "coupon created");
        Ok(coupon)
    }

    /// Remaining counter budget for a coupon, for listing endpoints.
    ///
    /// Negative values mean the coupon sold out and over-claims were
    /// still counted; absent or expired counters read as zero.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] if the counter store is
    /// unreachable.
    pub async fn coupon_stock(&self, coupon_id: CouponId) -> Result<i64, CoreError> {
        let value = self.counters.get(&coupon_stock_key(coupon_id)).await?;
        Ok(value.unwrap_or(0))
    }
}

impl CouponIssuance for SyncCouponService {
    fn issue_coupon(
        &self,
        email: &str,
        coupon_code: &str,
    ) -> BoxFuture<'_, Result<IssuanceOutcome, CoreError>> {
        let email = email.to_string();
        let coupon_code = coupon_code.to_string();
        Box::pin(async move {
            let member = self.members.find(&email).await.map_err(|err| match err {
                StoreError::NotFound(_) => CoreError::NotFound(format!("member '{email}'")),
                other => CoreError::from(other),
            })?;
            let coupon = self
                .coupons
                .find_by_code(&coupon_code)
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
                    coupon_code: coupon_code.clone(),
                });
            }

            let marker = coupon_issued_key(coupon.id, &member.email);
            if self.counters.has_marker(&marker).await?
                || self.grants.exists(&email, &coupon_code).await?
            {
                return Err(CoreError::AlreadyIssued {
                    email: email.clone(),
                    coupon_code: coupon_code.clone(),
                });
            }

            // A negative counter is sold out and stays negative; undoing
            // the decrement would let a concurrent claim double-spend the
            // last unit.
            let remaining = self.counters.decrement(&coupon_stock_key(coupon.id)).await?;
            if remaining < 0 {
                return Err(CoreError::CouponUnavailable {
                    coupon_code: coupon_code.clone(),
                });
            }

            let grant = MemberCoupon {
                member_email: member.email.clone(),
                coupon_id: coupon.id,
                coupon_code: coupon.code.clone(),
                used: false,
                issued_at: now,
            };
            let grant = match self.grants.insert(grant).await {
                Ok(grant) => grant,
                Err(StoreError::Conflict(_)) => {
                    return Err(CoreError::AlreadyIssued {
                        email: email.clone(),
                        coupon_code: coupon_code.clone(),
                    });
                },
                Err(err) => return Err(err.into()),
            };
            self.counters.put_marker(&marker, COUNTER_TTL).await?;

            info!(email, coupon_code, remaining, "coupon granted");
            Ok(IssuanceOutcome::Granted(grant))
        })
    }
}
