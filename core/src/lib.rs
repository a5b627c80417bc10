//! # Flashsale Core
//!
//! Domain types, error taxonomy, and trait seams for safely allocating a
//! finite, shared resource (product stock, coupon stock) under heavy
//! concurrent contention, and for propagating the outcome asynchronously
//! and reliably to other subsystems.
//!
//! ## Architecture
//!
//! ```text
//! checkout request                  coupon claim request
//!       │                                 │
//!       ▼                                 ▼
//! ┌──────────────┐                  ┌──────────┐
//! │    Stock     │                  │ Producer │
//! │ Reservation  │                  └────┬─────┘
//! └──────┬───────┘                       │ publish
//!        │ same txn                      ▼
//!        ▼                         ┌──────────┐
//! ┌──────────────┐                 │  Broker  │
//! │ Outbox row   │                 └────┬─────┘
//! └──────┬───────┘                      │ drain (batch)
//!        │ poll                         ▼
//!        ▼                         ┌──────────┐     ┌─────────┐
//! ┌──────────────┐                 │ Consumer │────►│ Counter │
//! │  Publisher   │                 └────┬─────┘     │  Store  │
//! └──────────────┘                      │           └─────────┘
//!                                       ▼
//!                                  Saga log + grant row
//! ```
//!
//! This crate holds the WHAT: entities, statuses, keys, error taxonomy,
//! and the traits every collaborator is reached through
//! ([`counter::CounterStore`], [`lock::LockProvider`],
//! [`broker::MessageBroker`], the stores in [`store`]). The engine lives in
//! `flashsale-runtime`; production adapters in `flashsale-redpanda`;
//! in-memory implementations in `flashsale-testing`.
//!
//! ## Design principles
//!
//! - **Atomic or locked**: shared counters move only by atomic ops; stock
//!   moves only inside a row lock or a distributed lock.
//! - **At-least-once, idempotent**: the broker may redeliver; dedup
//!   markers and unique grant constraints absorb duplicates.
//! - **Single writer**: saga rows and outbox rows each have exactly one
//!   mutating component.
//! - **Explicit injection**: collaborators arrive through constructors as
//!   `Arc<dyn Trait>`; there is no container.

pub mod broker;
pub mod counter;
pub mod domain;
pub mod environment;
pub mod error;
pub mod lock;
pub mod outbox;
pub mod saga;
pub mod store;

pub use broker::{BrokerError, BrokerMessage, COUPON_ISSUE_TOPIC, MessageBroker, MessageStream};
pub use counter::{COUNTER_TTL, CounterError, CounterStore, coupon_issued_key, coupon_stock_key};
pub use domain::{Coupon, CouponId, CouponKind, Member, MemberCoupon, Product, ProductId};
pub use environment::{Clock, SystemClock};
pub use error::CoreError;
pub use lock::{LockError, LockGuard, LockHandle, LockProvider, product_lock_key};
pub use outbox::{MAX_OUTBOX_RETRIES, OutboxRecord, OutboxStatus};
pub use saga::{CouponIssueMessage, MAX_SAGA_RETRIES, SagaEvent, SagaStatus};
pub use store::{
    CouponStore, GrantStore, MemberStore, OutboxStore, ProductRowGuard, ProductStore, SagaStore,
    StoreError,
};
