//! Stock reservation over versioned product rows.
//!
//! Two strategies are available. `Optimistic` runs check-and-decrement as a
//! compare-and-swap through the retry executor. `Lock` additionally wraps it
//! in a `product:<id>` lease so contending flows queue instead of spinning,
//! and is the default.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::domain::locking::{LockManager, ResourceKey};
use crate::domain::ports::VersionedStore;
use crate::domain::retry::{AttemptError, OptimisticRetryExecutor};
use crate::domain::{Error, Money, OrderItem, OrderLine, Product, ProductId, RequestContext};

/// How stock decrements are serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStrategy {
    /// Compare-and-swap with retry. Suits low contention; a hot row can
    /// exhaust the retry budget.
    Optimistic,
    /// Compare-and-swap under a product lease.
    #[default]
    Lock,
}

impl FromStr for ReservationStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Ok(Self::Optimistic),
            "lock" => Ok(Self::Lock),
            other => Err(format!(
                "unknown reservation strategy `{other}` (expected `optimistic` or `lock`)"
            )),
        }
    }
}

/// Lifecycle of a [`Reservation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    /// Stock is held.
    Held,
    /// Stock was returned.
    Released,
    /// Stock was sold.
    Committed,
}

/// Stock held for one product line.
///
/// Deliberately not `Clone`: one reservation is released or committed once.
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    product_id: ProductId,
    quantity: u32,
    unit_price: Money,
    state: ReservationState,
}

impl Reservation {
    /// Rebuild the held reservation behind a persisted order line.
    pub(crate) fn held_for(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            state: ReservationState::Held,
        }
    }

    /// Reserved product.
    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// Reserved units.
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Unit price read when the stock was taken.
    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    /// Current state.
    pub fn state(&self) -> ReservationState {
        self.state
    }

    /// Order line snapshot for this reservation.
    pub fn to_item(&self) -> OrderItem {
        OrderItem {
            product_id: self.product_id,
            quantity: self.quantity,
            unit_price: self.unit_price,
        }
    }
}

/// Stock reservation service.
pub struct InventoryService {
    products: Arc<dyn VersionedStore<Product>>,
    locks: Arc<LockManager>,
    retry: Arc<OptimisticRetryExecutor>,
    strategy: ReservationStrategy,
    lock_wait: Duration,
}

impl InventoryService {
    /// Build the service. `lock_wait` bounds lease waits in `Lock` mode.
    pub fn new(
        products: Arc<dyn VersionedStore<Product>>,
        locks: Arc<LockManager>,
        retry: Arc<OptimisticRetryExecutor>,
        strategy: ReservationStrategy,
        lock_wait: Duration,
    ) -> Self {
        Self {
            products,
            locks,
            retry,
            strategy,
            lock_wait,
        }
    }

    /// Active strategy.
    pub fn strategy(&self) -> ReservationStrategy {
        self.strategy
    }

    /// Take `quantity` units of `product_id`.
    ///
    /// Fails with `OutOfStock` (never retried) when fewer units remain,
    /// `NotFound` for unknown products and `InvalidRequest` for zero.
    pub async fn reserve(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Reservation, Error> {
        if quantity == 0 {
            return Err(Error::invalid_request("reservation quantity must be positive"));
        }

        let reservation = match self.strategy {
            ReservationStrategy::Optimistic => self.decrement(ctx, product_id, quantity).await?,
            ReservationStrategy::Lock => {
                self.locks
                    .with_lock(ctx, ResourceKey::product(product_id), self.lock_wait, || {
                        self.decrement(ctx, product_id, quantity)
                    })
                    .await?
            }
        };

        info!(%product_id, quantity, strategy = ?self.strategy, "stock reserved");
        Ok(reservation)
    }

    /// Reserve every line, all or nothing.
    ///
    /// Lines for the same product are merged and products are taken in
    /// ascending id order. When a line fails, lines already held are released
    /// before the error is returned.
    pub async fn reserve_all(
        &self,
        ctx: &RequestContext,
        lines: &[OrderLine],
    ) -> Result<Vec<Reservation>, Error> {
        let merged = merge_lines(lines)?;

        let leases = match self.strategy {
            ReservationStrategy::Optimistic => Vec::new(),
            ReservationStrategy::Lock => {
                let keys = merged.keys().map(|id| ResourceKey::product(*id));
                self.locks.acquire_all(ctx, keys, self.lock_wait).await?
            }
        };

        let mut held = Vec::with_capacity(merged.len());
        let mut failure = None;
        for (product_id, quantity) in merged {
            match self.reserve(ctx, product_id, quantity).await {
                Ok(reservation) => held.push(reservation),
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        if let Some(error) = failure {
            for mut reservation in held {
                if let Err(release_error) = self.release(ctx, &mut reservation).await {
                    warn!(
                        product_id = %reservation.product_id,
                        quantity = reservation.quantity,
                        error = %release_error,
                        "failed to return stock after partial reservation",
                    );
                }
            }
            self.locks.release_all(&leases).await;
            return Err(error);
        }

        self.locks.release_all(&leases).await;
        Ok(held)
    }

    /// Return held stock. Releasing twice is a no-op.
    pub async fn release(
        &self,
        ctx: &RequestContext,
        reservation: &mut Reservation,
    ) -> Result<(), Error> {
        match reservation.state {
            ReservationState::Released => return Ok(()),
            ReservationState::Committed => {
                return Err(Error::invalid_state(format!(
                    "reservation for {} is already committed",
                    reservation.product_id
                )));
            }
            ReservationState::Held => {}
        }

        let product_id = reservation.product_id;
        let quantity = reservation.quantity;
        self.retry
            .run(ctx, "release_stock", |_| async move {
                let current = self.products.read(product_id).await?;
                let next = current.record.return_stock(quantity);
                self.products
                    .compare_and_swap(product_id, current.version, next)
                    .await?;
                Ok(())
            })
            .await?;

        reservation.state = ReservationState::Released;
        info!(%product_id, quantity, "stock released");
        Ok(())
    }

    /// Mark held stock as sold. No store write happens.
    pub fn commit(&self, reservation: &mut Reservation) -> Result<(), Error> {
        match reservation.state {
            ReservationState::Held => {
                reservation.state = ReservationState::Committed;
                Ok(())
            }
            ReservationState::Committed => Ok(()),
            ReservationState::Released => Err(Error::invalid_state(format!(
                "reservation for {} was already released",
                reservation.product_id
            ))),
        }
    }

    async fn decrement(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Reservation, Error> {
        self.retry
            .run(ctx, "reserve_stock", |_| async move {
                let current = self.products.read(product_id).await?;
                let Some(next) = current.record.take_stock(quantity) else {
                    let available = current.record.stock_quantity;
                    return Err(AttemptError::Fatal(
                        Error::out_of_stock(format!(
                            "{product_id} has {available} left, {quantity} requested"
                        ))
                        .with_details(json!({
                            "productId": product_id,
                            "available": available,
                            "requested": quantity,
                        })),
                    ));
                };
                self.products
                    .compare_and_swap(product_id, current.version, next)
                    .await?;
                Ok(Reservation {
                    product_id,
                    quantity,
                    unit_price: current.record.unit_price,
                    state: ReservationState::Held,
                })
            })
            .await
    }
}

/// Validate lines and sum quantities per product in ascending id order.
pub(crate) fn merge_lines(lines: &[OrderLine]) -> Result<BTreeMap<ProductId, u32>, Error> {
    if lines.is_empty() {
        return Err(Error::invalid_request("at least one order line is required"));
    }
    let mut merged = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(Error::invalid_request(format!(
                "quantity for {} must be positive",
                line.product_id
            )));
        }
        let total: &mut u32 = merged.entry(line.product_id).or_default();
        *total = total
            .checked_add(line.quantity)
            .ok_or_else(|| Error::invalid_request("order line quantity overflows"))?;
    }
    Ok(merged)
}

#[cfg(test)]
#[path = "inventory_tests.rs"]
mod tests;
