//! Stock reservation under contention.
//!
//! Two interchangeable strategies guard the read-check-write on product
//! stock:
//!
//! - [`RowLockStockService`]: takes the store's exclusive row lock, so
//!   concurrent reservations of one product serialize at the row.
//! - [`DistributedLockStockService`]: takes the named lock
//!   `product:lock:{id}` and flushes the row write before releasing, so
//!   exclusion holds across processes that do not share a database
//!   transaction scope.
//!
//! Either way each reservation is its own durable unit: a later failure in
//! the caller's flow does not unwind it, which is what
//! [`OrderReservations`] compensates for explicitly.

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{info, instrument};

use flashsale_core::domain::{Product, ProductId};
use flashsale_core::error::CoreError;
use flashsale_core::lock::product_lock_key;
use flashsale_core::store::ProductStore;

use crate::lock::LockService;

/// One line of an order: a product and a quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderLine {
    /// Product to reserve.
    pub product_id: ProductId,
    /// Units to reserve.
    pub quantity: u32,
}

/// Reserves and releases units of product stock.
///
/// Implementations must guarantee that concurrent `reserve` calls for the
/// same product never oversell: the check and the decrement happen inside
/// one critical section.
pub trait StockReservation: Send + Sync {
    /// Atomically reserve `quantity` units, returning the committed row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InsufficientStock`] when stock is short,
    /// [`CoreError::ResourceBusy`] when the lock cannot be acquired in
    /// time, or [`CoreError::NotFound`] for an unknown product.
    fn reserve(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<Product, CoreError>>;

    /// Return previously reserved units (cancellation, compensation).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown product or
    /// [`CoreError::ResourceBusy`] when the lock cannot be acquired.
    fn release(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<Product, CoreError>>;
}

/// Reservation via the store's pessimistic row lock.
#[derive(Clone)]
pub struct RowLockStockService {
    products: Arc<dyn ProductStore>,
}

impl RowLockStockService {
    /// Create a service over `products`.
    #[must_use]
    pub fn new(products: Arc<dyn ProductStore>) -> Self {
        Self { products }
    }
}

impl StockReservation for RowLockStockService {
    #[instrument(skip(self), fields(strategy = "row_lock"))]
    fn reserve(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<Product, CoreError>> {
        Box::pin(async move {
            let mut guard = self.products.lock_for_update(product_id).await?;
            guard.product_mut().decrease_stock(quantity)?;
            let product = self.products.commit(guard).await?;
            info!(%product_id, quantity, remaining = product.stock, "stock reserved");
            Ok(product)
        })
    }

    fn release(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<Product, CoreError>> {
        Box::pin(async move {
            let mut guard = self.products.lock_for_update(product_id).await?;
            guard.product_mut().increase_stock(quantity);
            let product = self.products.commit(guard).await?;
            info!(%product_id, quantity, remaining = product.stock, "stock released");
            Ok(product)
        })
    }
}

/// Reservation via the named lock `product:lock:{id}`.
#[derive(Clone)]
pub struct DistributedLockStockService {
    products: Arc<dyn ProductStore>,
    locks: LockService,
}

impl DistributedLockStockService {
    /// Create a service over `products` using `locks` for exclusion.
    #[must_use]
    pub fn new(products: Arc<dyn ProductStore>, locks: LockService) -> Self {
        Self { products, locks }
    }
}

impl StockReservation for DistributedLockStockService {
    #[instrument(skip(self), fields(strategy = "distributed_lock"))]
    fn reserve(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<Product, CoreError>> {
        Box::pin(async move {
            let key = product_lock_key(product_id);
            self.locks
                .with_lock(&key, || async {
                    let mut product = self.products.find(product_id).await?;
                    product.decrease_stock(quantity)?;
                    // Flush before the lock is released so the next holder
                    // reads the decremented value.
                    let product = self.products.save(&product).await?;
                    info!(%product_id, quantity, remaining = product.stock, "stock reserved");
                    Ok(product)
                })
                .await
        })
    }

    fn release(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<Product, CoreError>> {
        Box::pin(async move {
            let key = product_lock_key(product_id);
            self.locks
                .with_lock(&key, || async {
                    let mut product = self.products.find(product_id).await?;
                    product.increase_stock(quantity);
                    let product = self.products.save(&product).await?;
                    info!(%product_id, quantity, remaining = product.stock, "stock released");
                    Ok(product)
                })
                .await
        })
    }
}

/// Multi-line order reservation with ordered acquisition and compensation.
///
/// Lines are reserved one product at a time in ascending product-id order,
/// so two orders touching the same products always contend in the same
/// sequence and cannot deadlock against each other. When a line fails,
/// every line already reserved is released before the error propagates.
pub struct OrderReservations {
    stock: Arc<dyn StockReservation>,
}

impl OrderReservations {
    /// Create a helper over any reservation strategy.
    #[must_use]
    pub fn new(stock: Arc<dyn StockReservation>) -> Self {
        Self { stock }
    }

    /// Reserve every line or none of them.
    ///
    /// # Errors
    ///
    /// Propagates the first line's error after compensating the lines
    /// reserved before it. A compensation failure is logged and swallowed;
    /// the original error is the one the caller needs.
    pub async fn reserve_all(&self, lines: &[OrderLine]) -> Result<Vec<Product>, CoreError> {
        let mut ordered: Vec<OrderLine> = lines.to_vec();
        ordered.sort_by_key(|line| line.product_id);

        let mut reserved: Vec<OrderLine> = Vec::with_capacity(ordered.len());
        let mut products = Vec::with_capacity(ordered.len());

        for line in ordered {
            match self.stock.reserve(line.product_id, line.quantity).await {
                Ok(product) => {
                    reserved.push(line);
                    products.push(product);
                },
                Err(err) => {
                    for done in reserved.iter().rev() {
                        if let Err(release_err) =
                            self.stock.release(done.product_id, done.quantity).await
                        {
                            tracing::error!(
                                product_id = %done.product_id,
                                %release_err,
                                "compensating release failed"
                            );
                        }
                    }
                    return Err(err);
                },
            }
        }
        Ok(products)
    }
}
