//! Oversell protection under concurrent reservations, for both strategies.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use flashsale_core::domain::{Product, ProductId};
use flashsale_core::error::CoreError;
use flashsale_core::store::ProductStore;
use flashsale_runtime::{
    DistributedLockStockService, LockConfig, LockService, OrderLine, OrderReservations,
    RowLockStockService, StockReservation,
};
use flashsale_testing::{InMemoryLockProvider, InMemoryProductStore};

fn seeded_store(stocks: &[(u64, u32)]) -> Arc<InMemoryProductStore> {
    let store = Arc::new(InMemoryProductStore::new());
    for &(id, stock) in stocks {
        store.insert(Product {
            id: ProductId(id),
            name: format!("product-{id}"),
            price: 1000,
            stock,
        });
    }
    store
}

fn row_lock(store: &Arc<InMemoryProductStore>) -> Arc<dyn StockReservation> {
    Arc::new(RowLockStockService::new(
        Arc::clone(store) as Arc<dyn ProductStore>
    ))
}

fn distributed(store: &Arc<InMemoryProductStore>) -> Arc<dyn StockReservation> {
    let locks = LockService::new(
        Arc::new(InMemoryLockProvider::new()),
        LockConfig {
            wait: Duration::from_secs(5),
            lease: Duration::from_secs(10),
        },
    );
    Arc::new(DistributedLockStockService::new(
        Arc::clone(store) as Arc<dyn ProductStore>,
        locks,
    ))
}

/// 30 buyers of 5 units each against a stock of 100: exactly 20 succeed,
/// 10 get `InsufficientStock`, and the final stock is exactly 0.
async fn oversell_scenario(store: Arc<InMemoryProductStore>, svc: Arc<dyn StockReservation>) {
    let mut handles = Vec::new();
    for _ in 0..30 {
        let svc = Arc::clone(&svc);
        handles.push(tokio::spawn(
            async move { svc.reserve(ProductId(1), 5).await },
        ));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(CoreError::InsufficientStock { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 20);
    assert_eq!(rejected, 10);
    assert_eq!(store.find(ProductId(1)).await.unwrap().stock, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn row_lock_never_oversells() {
    let store = seeded_store(&[(1, 100)]);
    let svc = row_lock(&store);
    oversell_scenario(store, svc).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distributed_lock_never_oversells() {
    let store = seeded_store(&[(1, 100)]);
    let svc = distributed(&store);
    oversell_scenario(store, svc).await;
}

/// Two orders listing the same products in opposite order: ordered
/// acquisition means both complete rather than deadlocking.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposing_orders_complete() {
    let store = seeded_store(&[(1, 100), (2, 100)]);
    let orders = Arc::new(OrderReservations::new(row_lock(&store)));

    let mut handles = Vec::new();
    for i in 0..20 {
        let orders = Arc::clone(&orders);
        let lines = if i % 2 == 0 {
            vec![
                OrderLine { product_id: ProductId(1), quantity: 2 },
                OrderLine { product_id: ProductId(2), quantity: 3 },
            ]
        } else {
            vec![
                OrderLine { product_id: ProductId(2), quantity: 3 },
                OrderLine { product_id: ProductId(1), quantity: 2 },
            ]
        };
        handles.push(tokio::spawn(
            async move { orders.reserve_all(&lines).await },
        ));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.find(ProductId(1)).await.unwrap().stock, 60);
    assert_eq!(store.find(ProductId(2)).await.unwrap().stock, 40);
}

#[tokio::test]
async fn partial_order_is_fully_compensated() {
    let store = seeded_store(&[(1, 10), (2, 10), (3, 1)]);
    let orders = OrderReservations::new(distributed(&store));

    let err = orders
        .reserve_all(&[
            OrderLine { product_id: ProductId(1), quantity: 4 },
            OrderLine { product_id: ProductId(2), quantity: 4 },
            OrderLine { product_id: ProductId(3), quantity: 2 },
        ])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::InsufficientStock { product_id: ProductId(3), .. }
    ));

    for id in [1, 2] {
        assert_eq!(store.find(ProductId(id)).await.unwrap().stock, 10);
    }
    assert_eq!(store.find(ProductId(3)).await.unwrap().stock, 1);
}
