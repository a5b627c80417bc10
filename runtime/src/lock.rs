//! Named-lock execution wrapper.
//!
//! [`LockService::with_lock`] is the only way runtime code runs under a
//! distributed lock: acquire with a bounded wait, run the critical section,
//! release. Callers never see the guard, so a critical section cannot
//! outlive its lock by accident (the lease cap still bounds a stalled
//! holder).

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use flashsale_core::error::CoreError;
use flashsale_core::lock::LockProvider;

use crate::config::LockConfig;

/// Runs closures under named distributed locks.
#[derive(Clone)]
pub struct LockService {
    provider: Arc<dyn LockProvider>,
    config: LockConfig,
}

impl LockService {
    /// Create a service over `provider` with the given wait/lease tuning.
    #[must_use]
    pub fn new(provider: Arc<dyn LockProvider>, config: LockConfig) -> Self {
        Self { provider, config }
    }

    /// Run `task` while holding the lock for `key`.
    ///
    /// The task starts only after the lock is acquired and the lock is
    /// released as soon as the task finishes, success or failure.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ResourceBusy`] if the lock is still held by
    /// someone else after the configured wait, or the task's own error.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, task: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let guard = self
            .provider
            .try_acquire(key, self.config.wait, self.config.lease)
            .await
            .map_err(|err| {
                warn!(key, %err, "lock acquisition failed");
                CoreError::from(err)
            })?;
        debug!(key, "lock acquired");

        let result = task().await;

        drop(guard);
        debug!(key, "lock released");
        result
    }
}
