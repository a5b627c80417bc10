//! In-memory store implementations.
//!
//! Each store keeps its rows behind a `std::sync::Mutex`, held only for the
//! duration of one map operation. The product store additionally wraps each
//! row in a `tokio::sync::Mutex` so `lock_for_update` can block across
//! await points the way `SELECT ... FOR UPDATE` blocks across statements.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

use flashsale_core::domain::{Coupon, CouponId, Member, MemberCoupon, Product, ProductId};
use flashsale_core::outbox::OutboxRecord;
use flashsale_core::saga::{SagaEvent, SagaStatus};
use flashsale_core::store::{
    CouponStore, GrantStore, MemberStore, OutboxStore, ProductRowGuard, ProductStore, SagaStore,
    StoreError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type ProductRow = Arc<tokio::sync::Mutex<Product>>;

/// In-memory [`ProductStore`] with per-row write locks.
#[derive(Debug, Default)]
pub struct InMemoryProductStore {
    rows: Mutex<HashMap<ProductId, ProductRow>>,
}

impl InMemoryProductStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a product row.
    pub fn insert(&self, product: Product) {
        lock(&self.rows).insert(product.id, Arc::new(tokio::sync::Mutex::new(product)));
    }

    fn row(&self, id: ProductId) -> Result<ProductRow, StoreError> {
        lock(&self.rows)
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))
    }
}

struct RowGuard {
    inner: OwnedMutexGuard<Product>,
}

impl ProductRowGuard for RowGuard {
    fn product(&self) -> &Product {
        &self.inner
    }

    fn product_mut(&mut self) -> &mut Product {
        &mut self.inner
    }
}

impl ProductStore for InMemoryProductStore {
    fn find(&self, id: ProductId) -> BoxFuture<'_, Result<Product, StoreError>> {
        Box::pin(async move {
            let row = self.row(id)?;
            let product = row.lock().await;
            Ok(product.clone())
        })
    }

    fn lock_for_update(
        &self,
        id: ProductId,
    ) -> BoxFuture<'_, Result<Box<dyn ProductRowGuard>, StoreError>> {
        Box::pin(async move {
            let row = self.row(id)?;
            let inner = row.lock_owned().await;
            Ok(Box::new(RowGuard { inner }) as Box<dyn ProductRowGuard>)
        })
    }

    fn commit(
        &self,
        guard: Box<dyn ProductRowGuard>,
    ) -> BoxFuture<'_, Result<Product, StoreError>> {
        Box::pin(async move {
            // Mutations went through the shared row; dropping the guard
            // releases the lock and makes them visible.
            let product = guard.product().clone();
            drop(guard);
            Ok(product)
        })
    }

    fn save(&self, product: &Product) -> BoxFuture<'_, Result<Product, StoreError>> {
        let product = product.clone();
        Box::pin(async move {
            let row = self.row(product.id)?;
            let mut inner = row.lock().await;
            *inner = product.clone();
            Ok(product)
        })
    }
}

/// In-memory [`CouponStore`].
#[derive(Debug, Default)]
pub struct InMemoryCouponStore {
    rows: Mutex<HashMap<CouponId, Coupon>>,
}

impl InMemoryCouponStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CouponStore for InMemoryCouponStore {
    fn find(&self, id: CouponId) -> BoxFuture<'_, Result<Coupon, StoreError>> {
        Box::pin(async move {
            lock(&self.rows)
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("coupon {id}")))
        })
    }

    fn find_by_code(&self, code: &str) -> BoxFuture<'_, Result<Coupon, StoreError>> {
        let code = code.to_string();
        Box::pin(async move {
            lock(&self.rows)
                .values()
                .find(|c| c.code == code)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("coupon code '{code}'")))
        })
    }

    fn insert(&self, coupon: Coupon) -> BoxFuture<'_, Result<Coupon, StoreError>> {
        Box::pin(async move {
            let mut rows = lock(&self.rows);
            if rows.values().any(|c| c.code == coupon.code) {
                return Err(StoreError::Conflict(format!(
                    "coupon code '{}' already exists",
                    coupon.code
                )));
            }
            rows.insert(coupon.id, coupon.clone());
            Ok(coupon)
        })
    }
}

/// In-memory [`MemberStore`].
#[derive(Debug, Default)]
pub struct InMemoryMemberStore {
    rows: Mutex<HashMap<String, Member>>,
}

impl InMemoryMemberStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a member row.
    pub fn insert(&self, member: Member) {
        lock(&self.rows).insert(member.email.clone(), member);
    }
}

impl MemberStore for InMemoryMemberStore {
    fn find(&self, email: &str) -> BoxFuture<'_, Result<Member, StoreError>> {
        let email = email.to_string();
        Box::pin(async move {
            lock(&self.rows)
                .get(&email)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("member '{email}'")))
        })
    }
}

/// In-memory [`GrantStore`] enforcing one grant per (member, coupon code).
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    rows: Mutex<HashMap<(String, String), MemberCoupon>>,
}

impl InMemoryGrantStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of grants for one coupon, across all members.
    #[must_use]
    pub fn count_for_coupon(&self, coupon_code: &str) -> usize {
        lock(&self.rows)
            .keys()
            .filter(|(_, code)| code == coupon_code)
            .count()
    }
}

impl GrantStore for InMemoryGrantStore {
    fn exists(&self, email: &str, coupon_code: &str) -> BoxFuture<'_, Result<bool, StoreError>> {
        let key = (email.to_string(), coupon_code.to_string());
        Box::pin(async move { Ok(lock(&self.rows).contains_key(&key)) })
    }

    fn insert(&self, grant: MemberCoupon) -> BoxFuture<'_, Result<MemberCoupon, StoreError>> {
        Box::pin(async move {
            let key = (grant.member_email.clone(), grant.coupon_code.clone());
            let mut rows = lock(&self.rows);
            if rows.contains_key(&key) {
                return Err(StoreError::Conflict(format!(
                    "'{}' already holds coupon '{}'",
                    grant.member_email, grant.coupon_code
                )));
            }
            rows.insert(key, grant.clone());
            Ok(grant)
        })
    }

    fn list_for_member(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Vec<MemberCoupon>, StoreError>> {
        let email = email.to_string();
        Box::pin(async move {
            let mut grants: Vec<MemberCoupon> = lock(&self.rows)
                .values()
                .filter(|g| g.member_email == email)
                .cloned()
                .collect();
            grants.sort_by_key(|g| g.issued_at);
            Ok(grants)
        })
    }
}

/// In-memory [`SagaStore`] keyed by event id.
#[derive(Debug, Default)]
pub struct InMemorySagaStore {
    rows: Mutex<HashMap<String, SagaEvent>>,
}

impl InMemorySagaStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SagaStore for InMemorySagaStore {
    fn upsert(&self, event: SagaEvent) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            lock(&self.rows).insert(event.event_id.clone(), event);
            Ok(())
        })
    }

    fn find(&self, event_id: &str) -> BoxFuture<'_, Result<SagaEvent, StoreError>> {
        let event_id = event_id.to_string();
        Box::pin(async move {
            lock(&self.rows)
                .get(&event_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("saga event '{event_id}'")))
        })
    }

    fn list_with_status(
        &self,
        status: SagaStatus,
    ) -> BoxFuture<'_, Result<Vec<SagaEvent>, StoreError>> {
        Box::pin(async move {
            let mut events: Vec<SagaEvent> = lock(&self.rows)
                .values()
                .filter(|e| e.status == status)
                .cloned()
                .collect();
            events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(events)
        })
    }
}

/// In-memory [`OutboxStore`] with store-assigned monotonic ids.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    rows: Mutex<Vec<OutboxRecord>>,
    next_id: AtomicU64,
}

impl InMemoryOutboxStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row, in id order. For assertions.
    #[must_use]
    pub fn all(&self) -> Vec<OutboxRecord> {
        lock(&self.rows).clone()
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn append(&self, record: OutboxRecord) -> BoxFuture<'_, Result<OutboxRecord, StoreError>> {
        Box::pin(async move {
            let mut rows = lock(&self.rows);
            if rows.iter().any(|r| r.event_id == record.event_id) {
                return Err(StoreError::Conflict(format!(
                    "outbox event '{}' already appended",
                    record.event_id
                )));
            }
            let mut record = record;
            record.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            rows.push(record.clone());
            Ok(record)
        })
    }

    fn find_pending(&self) -> BoxFuture<'_, Result<Vec<OutboxRecord>, StoreError>> {
        Box::pin(async move {
            Ok(lock(&self.rows)
                .iter()
                .filter(|r| r.status == flashsale_core::outbox::OutboxStatus::Pending)
                .cloned()
                .collect())
        })
    }

    fn find_failed_for_retry(&self) -> BoxFuture<'_, Result<Vec<OutboxRecord>, StoreError>> {
        Box::pin(async move {
            Ok(lock(&self.rows)
                .iter()
                .filter(|r| {
                    r.status == flashsale_core::outbox::OutboxStatus::Failed && r.can_retry()
                })
                .cloned()
                .collect())
        })
    }

    fn update(&self, record: &OutboxRecord) -> BoxFuture<'_, Result<(), StoreError>> {
        let record = record.clone();
        Box::pin(async move {
            let mut rows = lock(&self.rows);
            match rows.iter_mut().find(|r| r.id == record.id) {
                Some(row) => {
                    *row = record;
                    Ok(())
                },
                None => Err(StoreError::NotFound(format!("outbox row {}", record.id))),
            }
        })
    }

    fn find_by_event_id(&self, event_id: &str) -> BoxFuture<'_, Result<OutboxRecord, StoreError>> {
        let event_id = event_id.to_string();
        Box::pin(async move {
            lock(&self.rows)
                .iter()
                .find(|r| r.event_id == event_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("outbox event '{event_id}'")))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn product(id: u64, stock: u32) -> Product {
        Product {
            id: ProductId(id),
            name: format!("product-{id}"),
            price: 1000,
            stock,
        }
    }

    #[tokio::test]
    async fn row_lock_serializes_writers() {
        let store = Arc::new(InMemoryProductStore::new());
        store.insert(product(1, 10));

        let mut guard = store.lock_for_update(ProductId(1)).await.unwrap();
        guard.product_mut().decrease_stock(4).unwrap();

        // A second locker must block until the first commits.
        let contender = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut g = store.lock_for_update(ProductId(1)).await.unwrap();
                g.product_mut().decrease_stock(4).unwrap();
                store.commit(g).await.unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        let committed = store.commit(guard).await.unwrap();
        assert_eq!(committed.stock, 6);

        let after = contender.await.unwrap();
        assert_eq!(after.stock, 2);
    }

    #[tokio::test]
    async fn missing_product_is_not_found() {
        let store = InMemoryProductStore::new();
        assert!(matches!(
            store.find(ProductId(99)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn grant_store_rejects_duplicates() {
        let store = InMemoryGrantStore::new();
        let grant = MemberCoupon {
            member_email: "a@b.c".to_string(),
            coupon_id: CouponId(1),
            coupon_code: "LAUNCH50".to_string(),
            used: false,
            issued_at: Utc::now(),
        };
        store.insert(grant.clone()).await.unwrap();
        assert!(store.exists("a@b.c", "LAUNCH50").await.unwrap());
        assert!(matches!(
            store.insert(grant).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.count_for_coupon("LAUNCH50"), 1);

        let mine = store.list_for_member("a@b.c").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].coupon_code, "LAUNCH50");
    }

    #[tokio::test]
    async fn outbox_assigns_ids_in_append_order() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let first = store
            .append(OutboxRecord::pending("order-created", "evt-1", "{}", now))
            .await
            .unwrap();
        let second = store
            .append(OutboxRecord::pending("order-created", "evt-2", "{}", now))
            .await
            .unwrap();
        assert!(first.id < second.id);

        let pending = store.find_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event_id, "evt-1");

        assert!(matches!(
            store
                .append(OutboxRecord::pending("order-created", "evt-1", "{}", now))
                .await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn failed_rows_leave_retry_queue_at_cap() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let mut row = store
            .append(OutboxRecord::pending("order-created", "evt-1", "{}", now))
            .await
            .unwrap();

        row.mark_failed("broker down", now);
        store.update(&row).await.unwrap();
        assert_eq!(store.find_failed_for_retry().await.unwrap().len(), 1);

        row.mark_failed("broker down", now);
        row.mark_failed("broker down", now);
        store.update(&row).await.unwrap();
        assert!(store.find_failed_for_retry().await.unwrap().is_empty());
    }
}
