//! Persistence boundary.
//!
//! The durable store is an external collaborator, specified only at its
//! interface: find-by-id/save/exists-by for the handful of entities the
//! core mutates. Implementations decide how to provide row locks and
//! atomic appends; `flashsale-testing` ships in-memory versions for tests.

use futures::future::BoxFuture;
use thiserror::Error;

use crate::domain::{Coupon, CouponId, Member, MemberCoupon, Product, ProductId};
use crate::outbox::OutboxRecord;
use crate::saga::{SagaEvent, SagaStatus};

/// Errors from the durable store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("row not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store could not be reached or the statement failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// An exclusively locked product row.
///
/// Mutations through [`ProductRowGuard::product_mut`] become visible to the
/// next lock holder when the guard is committed via
/// [`ProductStore::commit`]; holding the guard blocks every other
/// `lock_for_update` on the same row, which is exactly the pessimistic
/// write-lock behavior the row-lock reservation strategy relies on.
pub trait ProductRowGuard: Send {
    /// Read access to the locked row.
    fn product(&self) -> &Product;
    /// Write access to the locked row.
    fn product_mut(&mut self) -> &mut Product;
}

/// Product persistence.
pub trait ProductStore: Send + Sync {
    /// Fetch a product by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for a missing row.
    fn find(&self, id: ProductId) -> BoxFuture<'_, Result<Product, StoreError>>;

    /// Take an exclusive write lock on the row and return it.
    ///
    /// Blocks until the current holder commits, like `SELECT ... FOR
    /// UPDATE`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for a missing row.
    fn lock_for_update(
        &self,
        id: ProductId,
    ) -> BoxFuture<'_, Result<Box<dyn ProductRowGuard>, StoreError>>;

    /// Commit a locked row, releasing the lock and returning the final
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the write fails.
    fn commit(
        &self,
        guard: Box<dyn ProductRowGuard>,
    ) -> BoxFuture<'_, Result<Product, StoreError>>;

    /// Write a product row immediately (flush), outside any row lock.
    ///
    /// Used by the distributed-lock strategy, where exclusion comes from
    /// the named lock rather than the row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the row disappeared.
    fn save(&self, product: &Product) -> BoxFuture<'_, Result<Product, StoreError>>;
}

/// Coupon persistence.
pub trait CouponStore: Send + Sync {
    /// Fetch a coupon by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for a missing row.
    fn find(&self, id: CouponId) -> BoxFuture<'_, Result<Coupon, StoreError>>;

    /// Fetch a coupon by its claim code.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for a missing row.
    fn find_by_code(&self, code: &str) -> BoxFuture<'_, Result<Coupon, StoreError>>;

    /// Insert a new coupon.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the code is taken.
    fn insert(&self, coupon: Coupon) -> BoxFuture<'_, Result<Coupon, StoreError>>;
}

/// Member persistence.
pub trait MemberStore: Send + Sync {
    /// Fetch a member by email.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for a missing row.
    fn find(&self, email: &str) -> BoxFuture<'_, Result<Member, StoreError>>;
}

/// Grant (member coupon) persistence.
pub trait GrantStore: Send + Sync {
    /// Whether a grant exists for this member and coupon code.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the query fails.
    fn exists(&self, email: &str, coupon_code: &str) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Insert a grant; at most one per (member, coupon).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the member already holds the
    /// coupon.
    fn insert(&self, grant: MemberCoupon) -> BoxFuture<'_, Result<MemberCoupon, StoreError>>;

    /// All grants held by a member, the "my coupons" polling query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the query fails.
    fn list_for_member(&self, email: &str)
    -> BoxFuture<'_, Result<Vec<MemberCoupon>, StoreError>>;
}

/// Saga log persistence.
pub trait SagaStore: Send + Sync {
    /// Insert or update a row, keyed by `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the write fails.
    fn upsert(&self, event: SagaEvent) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Fetch a row by event id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for a missing row.
    fn find(&self, event_id: &str) -> BoxFuture<'_, Result<SagaEvent, StoreError>>;

    /// All rows in a given status, for reconciliation queries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the query fails.
    fn list_with_status(
        &self,
        status: SagaStatus,
    ) -> BoxFuture<'_, Result<Vec<SagaEvent>, StoreError>>;
}

/// Outbox persistence.
pub trait OutboxStore: Send + Sync {
    /// Append a row in the caller's durable unit, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a duplicate event id.
    fn append(&self, record: OutboxRecord) -> BoxFuture<'_, Result<OutboxRecord, StoreError>>;

    /// PENDING rows, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the query fails.
    fn find_pending(&self) -> BoxFuture<'_, Result<Vec<OutboxRecord>, StoreError>>;

    /// FAILED rows that still have retry budget, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the query fails.
    fn find_failed_for_retry(&self) -> BoxFuture<'_, Result<Vec<OutboxRecord>, StoreError>>;

    /// Persist a mutated row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the row disappeared.
    fn update(&self, record: &OutboxRecord) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Fetch a row by event id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for a missing row.
    fn find_by_event_id(&self, event_id: &str) -> BoxFuture<'_, Result<OutboxRecord, StoreError>>;
}
