//! # Flashsale Runtime
//!
//! The engine over `flashsale-core`: named-lock execution, stock
//! reservation, the coupon issuance pipeline, and the outbox publisher.
//! Everything is wired through the trait seams in `flashsale-core`, so the
//! same services run against the production adapters and against the
//! in-memory implementations in `flashsale-testing`.
//!
//! ## Components
//!
//! - [`lock::LockService`]: run a closure under a named distributed lock
//!   with bounded wait and a lease cap.
//! - [`stock`]: two interchangeable reservation strategies (row lock,
//!   distributed lock) plus multi-line orders with ordered acquisition and
//!   compensation.
//! - [`coupon`]: synchronous issuance, and the producer/batching-consumer
//!   pipeline with saga logging, dedup, and capped retries.
//! - [`outbox`]: transactional outbox rows and the polling publisher.
//! - [`composition::Services`]: the builder that wires it all by
//!   [`config::LockStrategy`] and [`config::IssuanceMode`].
//!
//! ## Example
//!
//! ```ignore
//! let services = Services::builder()
//!     .products(products)
//!     .coupons(coupons)
//!     // ...remaining stores, counters, locks, broker...
//!     .lock_strategy(LockStrategy::RowLock)
//!     .issuance_mode(IssuanceMode::Async)
//!     .build()?;
//!
//! let consumer = services.start_consumer().await?;
//! let publisher = services.start_publisher();
//! ```

pub mod composition;
pub mod config;
pub mod coupon;
pub mod lock;
pub mod outbox;
pub mod stock;

pub use composition::{Services, ServicesBuilder};
pub use config::{ConsumerConfig, IssuanceMode, LockConfig, LockStrategy, OutboxConfig};
pub use coupon::consumer::{ConsumerHandle, CouponIssueConsumer};
pub use coupon::producer::CouponIssueProducer;
pub use coupon::sync::SyncCouponService;
pub use coupon::{CouponIssuance, IssuanceOutcome};
pub use lock::LockService;
pub use outbox::{OutboxPublisher, OutboxService, PublisherHandle};
pub use stock::{
    DistributedLockStockService, OrderLine, OrderReservations, RowLockStockService,
    StockReservation,
};
