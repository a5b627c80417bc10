//! Outbox rows reaching the broker through the polling publisher.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use flashsale_core::broker::MessageBroker;
use flashsale_core::outbox::OutboxStatus;
use flashsale_core::store::OutboxStore;
use flashsale_runtime::{OutboxConfig, OutboxPublisher, OutboxService};
use flashsale_testing::{FlakyBroker, InMemoryBroker, InMemoryOutboxStore, test_clock};

#[derive(Serialize)]
struct OrderCreated {
    order_id: u64,
}

fn fast_config() -> OutboxConfig {
    OutboxConfig {
        pending_interval: Duration::from_millis(30),
        failed_interval: Duration::from_millis(60),
        failed_offset: Duration::from_millis(20),
    }
}

fn service(store: &Arc<InMemoryOutboxStore>) -> OutboxService {
    OutboxService::new(
        Arc::clone(store) as Arc<dyn OutboxStore>,
        Arc::new(test_clock()),
    )
}

#[tokio::test]
async fn spawned_loops_deliver_pending_rows() {
    let store = Arc::new(InMemoryOutboxStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let service = service(&store);

    let publisher = OutboxPublisher::new(
        Arc::clone(&store) as Arc<dyn OutboxStore>,
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        Arc::new(test_clock()),
        fast_config(),
    );
    let handle = publisher.spawn();

    let event_id = service
        .create_outbox_event("order-created", &OrderCreated { order_id: 7 })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let row = store.find_by_event_id(&event_id).await.unwrap();
            if row.status == OutboxStatus::Published {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("row was not published in time");

    handle.shutdown().await;
    assert_eq!(broker.published_to("order-created").len(), 1);
}

#[tokio::test]
async fn failed_row_recovers_through_the_retry_loop() {
    let store = Arc::new(InMemoryOutboxStore::new());
    let inner = Arc::new(InMemoryBroker::new());
    let broker: Arc<dyn MessageBroker> = Arc::new(FlakyBroker::new(
        Arc::clone(&inner) as Arc<dyn MessageBroker>,
        1,
    ));
    let service = service(&store);

    let publisher = OutboxPublisher::new(
        Arc::clone(&store) as Arc<dyn OutboxStore>,
        broker,
        Arc::new(test_clock()),
        fast_config(),
    );
    let handle = publisher.spawn();

    let event_id = service
        .create_outbox_event("order-created", &OrderCreated { order_id: 1 })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let row = store.find_by_event_id(&event_id).await.unwrap();
            if row.status == OutboxStatus::Published {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("row did not recover in time");

    handle.shutdown().await;

    let row = store.find_by_event_id(&event_id).await.unwrap();
    assert_eq!(row.retry_count, 1);
    assert!(row.error_message.is_some());
    assert_eq!(inner.published_to("order-created").len(), 1);
}

#[tokio::test]
async fn rows_publish_oldest_first() {
    let store = Arc::new(InMemoryOutboxStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let service = service(&store);

    let mut expected = Vec::new();
    for order_id in 0..5 {
        expected.push(
            service
                .create_outbox_event("order-created", &OrderCreated { order_id })
                .await
                .unwrap(),
        );
    }

    OutboxPublisher::new(
        Arc::clone(&store) as Arc<dyn OutboxStore>,
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        Arc::new(test_clock()),
        fast_config(),
    )
    .publish_pending()
    .await;

    let published: Vec<String> = broker
        .published_to("order-created")
        .into_iter()
        .map(|m| m.event_id)
        .collect();
    assert_eq!(published, expected);
}
