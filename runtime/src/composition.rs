//! Composition root.
//!
//! [`Services::builder`] takes the store, counter, lock, and broker
//! implementations plus the strategy choices and wires every service the
//! same way in production and in tests. The background tasks are not
//! started implicitly: call [`Services::start_consumer`] and
//! [`Services::start_publisher`] once the process is ready for them.

use std::sync::Arc;

use flashsale_core::broker::{COUPON_ISSUE_TOPIC, MessageBroker};
use flashsale_core::counter::CounterStore;
use flashsale_core::environment::{Clock, SystemClock};
use flashsale_core::error::CoreError;
use flashsale_core::lock::LockProvider;
use flashsale_core::store::{
    CouponStore, GrantStore, MemberStore, OutboxStore, ProductStore, SagaStore,
};

use crate::config::{ConsumerConfig, IssuanceMode, LockConfig, LockStrategy, OutboxConfig};
use crate::coupon::consumer::{ConsumerHandle, CouponIssueConsumer};
use crate::coupon::producer::CouponIssueProducer;
use crate::coupon::sync::SyncCouponService;
use crate::coupon::CouponIssuance;
use crate::lock::LockService;
use crate::outbox::{OutboxPublisher, OutboxService, PublisherHandle};
use crate::stock::{
    DistributedLockStockService, OrderReservations, RowLockStockService, StockReservation,
};

/// Everything the application talks to, fully wired.
pub struct Services {
    /// Stock reservation, per the configured [`LockStrategy`].
    pub stock: Arc<dyn StockReservation>,
    /// Multi-line order reservation over `stock`.
    pub orders: OrderReservations,
    /// Coupon claims, per the configured [`IssuanceMode`].
    pub issuance: Arc<dyn CouponIssuance>,
    /// Inline coupon administration (creation, seeding).
    pub coupon_admin: SyncCouponService,
    /// Outbox row creation.
    pub outbox: OutboxService,
    broker: Arc<dyn MessageBroker>,
    consumer_deps: ConsumerDeps,
    publisher: OutboxPublisher,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

struct ConsumerDeps {
    members: Arc<dyn MemberStore>,
    coupons: Arc<dyn CouponStore>,
    grants: Arc<dyn GrantStore>,
    sagas: Arc<dyn SagaStore>,
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
}

impl Services {
    /// Start building with the required collaborators.
    #[must_use]
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }

    /// Subscribe to the issuance topic and spawn the batching consumer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transient`] if the subscription fails.
    pub async fn start_consumer(&self) -> Result<ConsumerHandle, CoreError> {
        let stream = self.broker.subscribe(&[COUPON_ISSUE_TOPIC]).await?;
        let deps = &self.consumer_deps;
        let consumer = CouponIssueConsumer::new(
            Arc::clone(&deps.members),
            Arc::clone(&deps.coupons),
            Arc::clone(&deps.grants),
            Arc::clone(&deps.sagas),
            Arc::clone(&deps.counters),
            Arc::clone(&deps.clock),
            deps.config,
        );
        Ok(consumer.spawn(stream))
    }

    /// Spawn the outbox publisher loops.
    #[must_use]
    pub fn start_publisher(&self) -> PublisherHandle {
        self.publisher.clone().spawn()
    }
}

/// Builder for [`Services`].
#[derive(Default)]
pub struct ServicesBuilder {
    products: Option<Arc<dyn ProductStore>>,
    coupons: Option<Arc<dyn CouponStore>>,
    members: Option<Arc<dyn MemberStore>>,
    grants: Option<Arc<dyn GrantStore>>,
    sagas: Option<Arc<dyn SagaStore>>,
    outbox: Option<Arc<dyn OutboxStore>>,
    counters: Option<Arc<dyn CounterStore>>,
    locks: Option<Arc<dyn LockProvider>>,
    broker: Option<Arc<dyn MessageBroker>>,
    clock: Option<Arc<dyn Clock>>,
    lock_strategy: LockStrategy,
    issuance_mode: IssuanceMode,
    lock_config: LockConfig,
    consumer_config: ConsumerConfig,
    outbox_config: OutboxConfig,
}

/// A collaborator the builder cannot default.
#[derive(Debug, thiserror::Error)]
#[error("services builder is missing {0}")]
pub struct MissingDependency(&'static str);

macro_rules! setter {
    ($name:ident, $ty:ty) => {
        /// Provide this collaborator.
        #[must_use]
        pub fn $name(mut self, value: $ty) -> Self {
            self.$name = Some(value);
            self
        }
    };
}

impl ServicesBuilder {
    setter!(products, Arc<dyn ProductStore>);
    setter!(coupons, Arc<dyn CouponStore>);
    setter!(members, Arc<dyn MemberStore>);
    setter!(grants, Arc<dyn GrantStore>);
    setter!(sagas, Arc<dyn SagaStore>);
    setter!(outbox, Arc<dyn OutboxStore>);
    setter!(counters, Arc<dyn CounterStore>);
    setter!(locks, Arc<dyn LockProvider>);
    setter!(broker, Arc<dyn MessageBroker>);
    setter!(clock, Arc<dyn Clock>);

    /// Choose how checkout reserves stock.
    #[must_use]
    pub const fn lock_strategy(mut self, strategy: LockStrategy) -> Self {
        self.lock_strategy = strategy;
        self
    }

    /// Choose how coupon claims are issued.
    #[must_use]
    pub const fn issuance_mode(mut self, mode: IssuanceMode) -> Self {
        self.issuance_mode = mode;
        self
    }

    /// Override the named-lock tuning.
    #[must_use]
    pub const fn lock_config(mut self, config: LockConfig) -> Self {
        self.lock_config = config;
        self
    }

    /// Override the consumer batching tuning.
    #[must_use]
    pub const fn consumer_config(mut self, config: ConsumerConfig) -> Self {
        self.consumer_config = config;
        self
    }

    /// Override the outbox polling tuning.
    #[must_use]
    pub const fn outbox_config(mut self, config: OutboxConfig) -> Self {
        self.outbox_config = config;
        self
    }

    /// Wire everything up.
    ///
    /// # Errors
    ///
    /// Returns [`MissingDependency`] naming the first collaborator that
    /// was not provided.
    pub fn build(self) -> Result<Services, MissingDependency> {
        let products = self.products.ok_or(MissingDependency("products"))?;
        let coupons = self.coupons.ok_or(MissingDependency("coupons"))?;
        let members = self.members.ok_or(MissingDependency("members"))?;
        let grants = self.grants.ok_or(MissingDependency("grants"))?;
        let sagas = self.sagas.ok_or(MissingDependency("sagas"))?;
        let outbox_store = self.outbox.ok_or(MissingDependency("outbox"))?;
        let counters = self.counters.ok_or(MissingDependency("counters"))?;
        let locks = self.locks.ok_or(MissingDependency("locks"))?;
        let broker = self.broker.ok_or(MissingDependency("broker"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let lock_service = LockService::new(Arc::clone(&locks), self.lock_config);
        let stock: Arc<dyn StockReservation> = match self.lock_strategy {
            LockStrategy::RowLock => Arc::new(RowLockStockService::new(Arc::clone(&products))),
            LockStrategy::Distributed => Arc::new(DistributedLockStockService::new(
                Arc::clone(&products),
                lock_service,
            )),
        };
        let orders = OrderReservations::new(Arc::clone(&stock));

        let coupon_admin = SyncCouponService::new(
            Arc::clone(&members),
            Arc::clone(&coupons),
            Arc::clone(&grants),
            Arc::clone(&counters),
            Arc::clone(&clock),
        );
        let issuance: Arc<dyn CouponIssuance> = match self.issuance_mode {
            IssuanceMode::Sync => Arc::new(coupon_admin.clone()),
            IssuanceMode::Async => Arc::new(CouponIssueProducer::new(
                Arc::clone(&members),
                Arc::clone(&coupons),
                Arc::clone(&grants),
                Arc::clone(&sagas),
                Arc::clone(&counters),
                Arc::clone(&broker),
                Arc::clone(&clock),
            )),
        };

        let outbox = OutboxService::new(Arc::clone(&outbox_store), Arc::clone(&clock));
        let publisher = OutboxPublisher::new(
            outbox_store,
            Arc::clone(&broker),
            Arc::clone(&clock),
            self.outbox_config,
        );

        Ok(Services {
            stock,
            orders,
            issuance,
            coupon_admin,
            outbox,
            broker,
            consumer_deps: ConsumerDeps {
                members,
                coupons,
                grants,
                sagas,
                counters,
                clock,
                config: self.consumer_config,
            },
            publisher,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_testing::{
        InMemoryBroker, InMemoryCounterStore, InMemoryCouponStore, InMemoryGrantStore,
        InMemoryLockProvider, InMemoryMemberStore, InMemoryOutboxStore, InMemoryProductStore,
        InMemorySagaStore,
    };

    fn builder() -> ServicesBuilder {
        Services::builder()
            .products(Arc::new(InMemoryProductStore::new()))
            .coupons(Arc::new(InMemoryCouponStore::new()))
            .members(Arc::new(InMemoryMemberStore::new()))
            .grants(Arc::new(InMemoryGrantStore::new()))
            .sagas(Arc::new(InMemorySagaStore::new()))
            .outbox(Arc::new(InMemoryOutboxStore::new()))
            .counters(Arc::new(InMemoryCounterStore::new()))
            .locks(Arc::new(InMemoryLockProvider::new()))
            .broker(Arc::new(InMemoryBroker::new()))
    }

    #[tokio::test]
    async fn builds_with_defaults_and_starts_background_tasks() {
        let services = builder().build().unwrap();
        let consumer = services.start_consumer().await.unwrap();
        let publisher = services.start_publisher();
        consumer.shutdown().await;
        publisher.shutdown().await;
    }

    #[test]
    fn missing_collaborator_is_named() {
        let err = Services::builder().build().unwrap_err();
        assert!(err.to_string().contains("products"));
    }
}
