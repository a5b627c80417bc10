//! # Flashsale Testing
//!
//! In-memory implementations of every `flashsale-core` trait, plus fault
//! injectors, for deterministic tests without external infrastructure.
//!
//! - [`InMemoryCounterStore`]: Redis-like atomic counters with TTLs.
//! - [`InMemoryLockProvider`]: named locks with bounded wait and lease
//!   expiry.
//! - [`InMemoryBroker`]: per-topic channels with a published-message log.
//! - [`stores`]: product rows with real blocking write locks, plus coupon,
//!   member, grant, saga, and outbox stores.
//! - [`FlakyBroker`] / [`FlakyGrantStore`]: fail the first N operations to
//!   drive the retry paths.
//! - [`FixedClock`]: frozen time.
//!
//! Everything here mirrors the semantics the production adapters provide,
//! including the ones tests most depend on: `DECR` on a missing counter key
//! returns -1, lock release after lease expiry is a no-op, and the product
//! row lock blocks concurrent `lock_for_update` callers.

pub mod broker;
pub mod chaos;
pub mod clock;
pub mod counter;
pub mod lock;
pub mod stores;

pub use broker::InMemoryBroker;
pub use chaos::{FlakyBroker, FlakyGrantStore};
pub use clock::{FixedClock, test_clock};
pub use counter::InMemoryCounterStore;
pub use lock::InMemoryLockProvider;
pub use stores::{
    InMemoryCouponStore, InMemoryGrantStore, InMemoryMemberStore, InMemoryOutboxStore,
    InMemoryProductStore, InMemorySagaStore,
};
