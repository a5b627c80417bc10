//! Outbox event creation and background publication.
//!
//! [`OutboxService`] is the write side: it serializes a payload and
//! appends a PENDING row through the caller's store handle, in the same
//! durable unit as the business write. [`OutboxPublisher`] is the read
//! side: two timer loops poll PENDING rows every 5s and retriable FAILED
//! rows every 10s (offset by 3s so the loops interleave), publishing
//! oldest first to the topic named by the row's event type.
//!
//! The polls are also exposed as [`OutboxPublisher::publish_pending`] and
//! [`OutboxPublisher::retry_failed`] so tests can drive a cycle
//! deterministically instead of sleeping through timer intervals.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use flashsale_core::broker::{BrokerMessage, MessageBroker};
use flashsale_core::environment::Clock;
use flashsale_core::error::CoreError;
use flashsale_core::outbox::OutboxRecord;
use flashsale_core::store::OutboxStore;
use uuid::Uuid;

use crate::config::OutboxConfig;

/// Creates outbox rows alongside business writes.
#[derive(Clone)]
pub struct OutboxService {
    store: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
}

impl OutboxService {
    /// Wire up a service.
    #[must_use]
    pub fn new(store: Arc<dyn OutboxStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record a domain event for publication, returning its event id.
    ///
    /// `event_type` doubles as the destination topic.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if the payload cannot be
    /// serialized, or [`CoreError::Transient`] if the append fails.
    pub async fn create_outbox_event<T: Serialize>(
        &self,
        event_type: &str,
        payload: &T,
    ) -> Result<String, CoreError> {
        let body = serde_json::to_string(payload)
            .map_err(|err| CoreError::Serialization(err.to_string()))?;
        let event_id = Uuid::new_v4().to_string();
        let record = OutboxRecord::pending(event_type, &event_id, body, self.clock.now());
        let record = self.store.append(record).await?;
        debug!(event_id = record.event_id, event_type, "outbox row appended");
        Ok(record.event_id)
    }
}

/// Handle to the running publisher loops.
pub struct PublisherHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Stop both loops.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            error!(%err, "publisher task did not shut down cleanly");
        }
    }
}

/// Publishes outbox rows to the broker.
#[derive(Clone)]
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn MessageBroker>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
}

impl OutboxPublisher {
    /// Wire up a publisher.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn MessageBroker>,
        clock: Arc<dyn Clock>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            broker,
            clock,
            config,
        }
    }

    /// Spawn the two polling loops.
    #[must_use]
    pub fn spawn(self) -> PublisherHandle {
        let (stop, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut pending = tokio::time::interval(self.config.pending_interval);
            pending.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut failed = tokio::time::interval_at(
                tokio::time::Instant::now() + self.config.failed_offset,
                self.config.failed_interval,
            );
            failed.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = pending.tick() => self.publish_pending().await,
                    _ = failed.tick() => self.retry_failed().await,
                    _ = stop_rx.changed() => break,
                }
            }
            info!("outbox publisher stopped");
        });
        PublisherHandle { stop, task }
    }

    /// One PENDING poll cycle: fetch oldest first and publish each row.
    #[instrument(skip(self))]
    pub async fn publish_pending(&self) {
        match self.store.find_pending().await {
            Ok(rows) => self.publish_rows(rows).await,
            Err(err) => warn!(%err, "pending poll failed"),
        }
    }

    /// One FAILED poll cycle: rows under the retry cap, oldest first.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self) {
        match self.store.find_failed_for_retry().await {
            Ok(rows) => self.publish_rows(rows).await,
            Err(err) => warn!(%err, "failed-row poll failed"),
        }
    }

    async fn publish_rows(&self, rows: Vec<OutboxRecord>) {
        for mut row in rows {
            let message = BrokerMessage {
                key: None,
                event_id: row.event_id.clone(),
                timestamp: row.created_at,
                payload: row.payload.clone().into_bytes(),
            };
            let now = self.clock.now();
            match self.broker.publish(&row.event_type, &message).await {
                Ok(()) => {
                    row.mark_published(now);
                    info!(event_id = row.event_id, topic = row.event_type, "outbox row published");
                },
                Err(err) => {
                    row.mark_failed(err.to_string(), now);
                    warn!(
                        event_id = row.event_id,
                        retry_count = row.retry_count,
                        terminal = row.is_terminal(),
                        %err,
                        "outbox publish failed"
                    );
                },
            }
            if let Err(err) = self.store.update(&row).await {
                error!(event_id = row.event_id, %err, "outbox row update failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_core::outbox::OutboxStatus;
    use flashsale_testing::{FlakyBroker, InMemoryBroker, InMemoryOutboxStore, test_clock};

    #[derive(Serialize)]
    struct OrderCreated {
        order_id: u64,
    }

    fn publisher(
        store: Arc<InMemoryOutboxStore>,
        broker: Arc<dyn MessageBroker>,
    ) -> OutboxPublisher {
        OutboxPublisher::new(
            store,
            broker,
            Arc::new(test_clock()),
            OutboxConfig::default(),
        )
    }

    #[tokio::test]
    async fn pending_row_publishes_to_event_type_topic() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let service = OutboxService::new(
            Arc::clone(&store) as Arc<dyn OutboxStore>,
            Arc::new(test_clock()),
        );

        let event_id = service
            .create_outbox_event("order-created", &OrderCreated { order_id: 42 })
            .await
            .unwrap();

        publisher(Arc::clone(&store), Arc::clone(&broker) as Arc<dyn MessageBroker>)
            .publish_pending()
            .await;

        let published = broker.published_to("order-created");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_id, event_id);

        let row = store.find_by_event_id(&event_id).await.unwrap();
        assert_eq!(row.status, OutboxStatus::Published);
        assert!(row.published_at.is_some());
    }

    #[tokio::test]
    async fn one_failure_then_retry_succeeds() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let inner = Arc::new(InMemoryBroker::new());
        let broker: Arc<dyn MessageBroker> = Arc::new(FlakyBroker::new(
            Arc::clone(&inner) as Arc<dyn MessageBroker>,
            1,
        ));
        let service = OutboxService::new(
            Arc::clone(&store) as Arc<dyn OutboxStore>,
            Arc::new(test_clock()),
        );
        let event_id = service
            .create_outbox_event("order-created", &OrderCreated { order_id: 1 })
            .await
            .unwrap();

        let publisher = publisher(Arc::clone(&store), broker);
        publisher.publish_pending().await;
        let row = store.find_by_event_id(&event_id).await.unwrap();
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.retry_count, 1);

        publisher.retry_failed().await;
        let row = store.find_by_event_id(&event_id).await.unwrap();
        assert_eq!(row.status, OutboxStatus::Published);
        assert_eq!(row.retry_count, 1);
        assert_eq!(inner.published_to("order-created").len(), 1);
    }

    #[tokio::test]
    async fn exhausted_row_leaves_the_retry_queue() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let broker: Arc<dyn MessageBroker> = Arc::new(FlakyBroker::new(
            Arc::new(InMemoryBroker::new()) as Arc<dyn MessageBroker>,
            usize::MAX,
        ));
        let service = OutboxService::new(
            Arc::clone(&store) as Arc<dyn OutboxStore>,
            Arc::new(test_clock()),
        );
        let event_id = service
            .create_outbox_event("order-created", &OrderCreated { order_id: 1 })
            .await
            .unwrap();

        let publisher = publisher(Arc::clone(&store), broker);
        publisher.publish_pending().await;
        publisher.retry_failed().await;
        publisher.retry_failed().await;

        let row = store.find_by_event_id(&event_id).await.unwrap();
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.retry_count, 3);
        assert!(row.is_terminal());

        // A further cycle must skip the terminal row.
        publisher.retry_failed().await;
        let row = store.find_by_event_id(&event_id).await.unwrap();
        assert_eq!(row.retry_count, 3);
    }
}
