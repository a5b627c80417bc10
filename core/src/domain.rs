//! Domain entities shared across the stock and coupon pipelines.
//!
//! These are plain owned structs; persistence is behind the store traits in
//! [`crate::store`] and nothing here performs I/O. Stock mutation lives on
//! [`Product`] but is only reachable through the reservation service, which
//! wraps every change in a row lock or a distributed lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Identifier for a product row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a coupon row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CouponId(pub u64);

impl fmt::Display for CouponId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sellable product with a finite stock count.
///
/// Invariant: `stock` never goes below zero in a committed state. The
/// reservation service checks before decrementing inside its critical
/// section; no other code path mutates stock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product id.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Unit price in minor currency units.
    pub price: u64,
    /// Units currently available.
    pub stock: u32,
}

impl Product {
    /// Decrease stock by `qty`, failing before any change if stock is short.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InsufficientStock`] when `stock < qty`.
    pub fn decrease_stock(&mut self, qty: u32) -> Result<(), CoreError> {
        if self.stock < qty {
            return Err(CoreError::InsufficientStock {
                product_id: self.id,
                requested: qty,
                available: self.stock,
            });
        }
        self.stock -= qty;
        Ok(())
    }

    /// Increase stock by `qty` (cancellation/refund path).
    pub const fn increase_stock(&mut self, qty: u32) {
        self.stock += qty;
    }
}

/// How a coupon discounts an order total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponKind {
    /// Fixed amount off, in minor currency units.
    Fixed,
    /// Percentage off the order total.
    Rate,
}

/// A coupon definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Coupon id.
    pub id: CouponId,
    /// Unique coupon code members claim by.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Discount kind.
    pub kind: CouponKind,
    /// Fixed amount or percentage, depending on `kind`.
    pub discount_value: u64,
    /// Minimum order amount for the discount to apply.
    pub min_order_amount: u64,
    /// Whether the coupon is switched on.
    pub active: bool,
    /// Last instant the coupon may be claimed or used.
    pub end_date: DateTime<Utc>,
}

impl Coupon {
    /// Whether the coupon can currently be claimed.
    #[must_use]
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.active && now <= self.end_date
    }

    /// Discount for an order of `order_amount`, or zero below the minimum.
    #[must_use]
    pub const fn calculate_discount(&self, order_amount: u64) -> u64 {
        if order_amount < self.min_order_amount {
            return 0;
        }
        match self.kind {
            CouponKind::Fixed => self.discount_value,
            CouponKind::Rate => order_amount * self.discount_value / 100,
        }
    }
}

/// A member, keyed by email.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Email address; the member's primary key.
    pub email: String,
    /// Display nickname.
    pub nickname: String,
}

/// A coupon granted to a member, the durable outcome of a successful claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCoupon {
    /// Member email.
    pub member_email: String,
    /// The granted coupon.
    pub coupon_id: CouponId,
    /// Coupon code, denormalized for dedup queries.
    pub coupon_code: String,
    /// Whether the member has spent the coupon.
    pub used: bool,
    /// When the grant was persisted.
    pub issued_at: DateTime<Utc>,
}

impl MemberCoupon {
    /// Spend the coupon against an order, returning the discount.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CouponUnavailable`] if already used, the coupon
    /// is expired/inactive, or the order is below the minimum amount.
    pub fn use_coupon(
        &mut self,
        coupon: &Coupon,
        order_amount: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        if self.used || !coupon.is_available(now) {
            return Err(CoreError::CouponUnavailable {
                coupon_code: self.coupon_code.clone(),
            });
        }
        let discount = coupon.calculate_discount(order_amount);
        if discount == 0 {
            return Err(CoreError::CouponUnavailable {
                coupon_code: self.coupon_code.clone(),
            });
        }
        self.used = true;
        Ok(discount)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn coupon(kind: CouponKind, value: u64, min: u64) -> Coupon {
        Coupon {
            id: CouponId(1),
            code: "WELCOME10".to_string(),
            name: "Welcome".to_string(),
            kind,
            discount_value: value,
            min_order_amount: min,
            active: true,
            end_date: Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn decrease_stock_rejects_shortfall_without_mutating() {
        let mut p = Product {
            id: ProductId(1),
            name: "Keyboard".to_string(),
            price: 100,
            stock: 3,
        };
        let err = p.decrease_stock(5);
        assert!(matches!(err, Err(CoreError::InsufficientStock { available: 3, .. })));
        assert_eq!(p.stock, 3);

        assert!(p.decrease_stock(3).is_ok());
        assert_eq!(p.stock, 0);
    }

    #[test]
    fn rate_coupon_discount_respects_minimum() {
        let c = coupon(CouponKind::Rate, 10, 1000);
        assert_eq!(c.calculate_discount(999), 0);
        assert_eq!(c.calculate_discount(2000), 200);
    }

    #[test]
    fn fixed_coupon_discount() {
        let c = coupon(CouponKind::Fixed, 500, 0);
        assert_eq!(c.calculate_discount(100), 500);
    }

    #[test]
    fn expired_coupon_is_not_available() {
        let mut c = coupon(CouponKind::Fixed, 500, 0);
        c.end_date = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap();
        assert!(!c.is_available(Utc::now()));
    }

    #[test]
    fn member_coupon_single_use() {
        let c = coupon(CouponKind::Fixed, 500, 0);
        let mut mc = MemberCoupon {
            member_email: "a@b.c".to_string(),
            coupon_id: c.id,
            coupon_code: c.code.clone(),
            used: false,
            issued_at: Utc::now(),
        };
        assert_eq!(mc.use_coupon(&c, 1000, Utc::now()), Ok(500));
        assert!(mc.use_coupon(&c, 1000, Utc::now()).is_err());
    }
}
