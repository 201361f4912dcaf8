//! Order lifecycle orchestration.
//!
//! The state machine owns the unit of work that ties stock, coupon and
//! balance together. There is no ambient transaction: every failure after a
//! resource was taken runs an explicit compensation. Payment and cancellation
//! are serialized per order under an `order:<id>` lease, so an order cannot be
//! paid twice or paid and cancelled at once. Payment also holds the buyer's
//! `balance:<id>` lease around the debit.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::domain::inventory::{InventoryService, Reservation, merge_lines};
use crate::domain::locking::{LockManager, ResourceKey};
use crate::domain::ports::{EventPublisher, VersionedStore};
use crate::domain::retry::{AttemptError, OptimisticRetryExecutor};
use crate::domain::{
    BalanceLedger, CommerceEvent, CouponId, CouponIssuanceService, Error, ErrorCode, Money, Order,
    OrderId, OrderItem, OrderLine, OrderStatus, Product, RequestContext, UserId, Versioned,
    events::publish_committed,
};

/// Store and runtime dependencies of [`OrderStateMachine`].
pub struct OrderPorts {
    /// Order rows.
    pub orders: Arc<dyn VersionedStore<Order>>,
    /// Product rows, read for price snapshots.
    pub products: Arc<dyn VersionedStore<Product>>,
    /// Committed-event sink.
    pub events: Arc<dyn EventPublisher>,
    /// Wall clock for timestamps.
    pub clock: Arc<dyn Clock>,
}

/// Collaborating services the state machine drives.
pub struct OrderCollaborators {
    pub inventory: Arc<InventoryService>,
    pub coupons: Arc<CouponIssuanceService>,
    pub ledger: Arc<BalanceLedger>,
    pub locks: Arc<LockManager>,
    /// Retries the failure write when finalization breaks.
    pub retry: Arc<OptimisticRetryExecutor>,
}

/// Order lifecycle service.
pub struct OrderStateMachine {
    orders: Arc<dyn VersionedStore<Order>>,
    products: Arc<dyn VersionedStore<Product>>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    inventory: Arc<InventoryService>,
    coupons: Arc<CouponIssuanceService>,
    ledger: Arc<BalanceLedger>,
    locks: Arc<LockManager>,
    retry: Arc<OptimisticRetryExecutor>,
    lock_wait: Duration,
}

impl OrderStateMachine {
    /// Build the state machine. `lock_wait` bounds the order lease wait.
    pub fn new(ports: OrderPorts, collaborators: OrderCollaborators, lock_wait: Duration) -> Self {
        Self {
            orders: ports.orders,
            products: ports.products,
            events: ports.events,
            clock: ports.clock,
            inventory: collaborators.inventory,
            coupons: collaborators.coupons,
            ledger: collaborators.ledger,
            locks: collaborators.locks,
            retry: collaborators.retry,
            lock_wait,
        }
    }

    /// Create an order, reserve its stock and apply its coupon.
    ///
    /// On success the order is `STOCK_RESERVED`. When stock cannot be
    /// reserved or the coupon cannot be redeemed the order is persisted as
    /// `FAILED`, nothing stays held, and the error carries the order id.
    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        lines: &[OrderLine],
        coupon_id: Option<CouponId>,
    ) -> Result<Order, Error> {
        let items = self.price_lines(lines).await?;
        let order = Order::create(OrderId::random(), user_id, items, coupon_id, self.clock.utc())?;
        let version = self.orders.insert(order.clone()).await?;
        let created = Versioned::new(order, version);
        info!(order_id = %created.record.id, %user_id, "order created");

        let mut reservations = match self.inventory.reserve_all(ctx, lines).await {
            Ok(reservations) => reservations,
            Err(cause) => return Err(self.fail_creation(&created, cause).await),
        };

        let items = reservations.iter().map(Reservation::to_item).collect();
        let mut priced = match created.record.with_items(items) {
            Ok(priced) => priced,
            Err(cause) => {
                self.release_reservations(ctx, &mut reservations).await;
                return Err(self.fail_creation(&created, cause).await);
            }
        };
        if let Some(coupon_id) = coupon_id {
            match self
                .coupons
                .redeem(ctx, user_id, coupon_id, priced.id)
                .await
            {
                Ok(bps) => priced = priced.with_discount_bps(bps),
                Err(cause) => {
                    self.release_reservations(ctx, &mut reservations).await;
                    return Err(self.fail_creation(&created, cause).await);
                }
            }
        }

        let reserved = match priced.transition(OrderStatus::StockReserved, self.clock.utc()) {
            Ok(reserved) => reserved,
            Err(cause) => {
                self.undo_creation(ctx, &created.record, &mut reservations).await;
                return Err(cause);
            }
        };
        match self
            .orders
            .compare_and_swap(reserved.id, created.version, reserved.clone())
            .await
        {
            Ok(_) => {
                info!(
                    order_id = %reserved.id,
                    total = %reserved.total,
                    discount = %reserved.discount,
                    "order stock reserved",
                );
                Ok(reserved)
            }
            Err(store_error) => {
                self.undo_creation(ctx, &created.record, &mut reservations)
                    .await;
                Err(store_error.into())
            }
        }
    }

    /// Debit the buyer and complete a `STOCK_RESERVED` order.
    ///
    /// Runs under the order and balance leases, taken in global key order.
    /// `InsufficientBalance` cancels the order and releases its stock.
    /// Transient failures (lock timeout, retry exhaustion, store outage)
    /// before the debit commits leave the order `STOCK_RESERVED`.
    pub async fn pay_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, Error> {
        let keys = [ResourceKey::order(order_id), ResourceKey::balance(user_id)];
        let leases = self.locks.acquire_all(ctx, keys, self.lock_wait).await?;
        let outcome = self.pay_locked(ctx, order_id, user_id).await;
        self.locks.release_all(&leases).await;
        outcome
    }

    /// Cancel a `STOCK_RESERVED` order, releasing stock and restoring its
    /// coupon grant.
    pub async fn cancel_order(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, Error> {
        self.locks
            .with_lock(ctx, ResourceKey::order(order_id), self.lock_wait, || {
                self.cancel_locked(ctx, order_id, user_id)
            })
            .await
    }

    /// Read an order owned by `user_id`.
    pub async fn get_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, Error> {
        let current = self.orders.read(order_id).await?;
        ensure_owner(&current.record, user_id)?;
        Ok(current.record)
    }

    async fn pay_locked(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, Error> {
        let current = self.orders.read(order_id).await?;
        ensure_owner(&current.record, user_id)?;
        match current.record.status {
            OrderStatus::StockReserved => {}
            OrderStatus::Paid | OrderStatus::Completed => {
                return Err(Error::invalid_state(format!("{order_id} is already paid")));
            }
            status => {
                return Err(Error::invalid_state(format!(
                    "{order_id} cannot be paid while {status:?}"
                )));
            }
        }

        let total = current.record.total;
        let debited = if total.is_zero() {
            false
        } else {
            match self.ledger.debit(ctx, user_id, total).await {
                Ok(_) => true,
                Err(cause) if cause.code() == ErrorCode::InsufficientBalance => {
                    let cancelled = self.cancel_reserved(ctx, &current).await?;
                    return Err(annotate(cause, &cancelled));
                }
                Err(cause) => return Err(cause),
            }
        };

        let paid = match self.write_status(&current, OrderStatus::Paid).await {
            Ok(paid) => paid,
            Err(cause) => {
                if debited {
                    self.refund(ctx, user_id, total).await;
                }
                return Err(cause);
            }
        };
        info!(%order_id, %total, "order paid");

        self.finalize(ctx, paid).await
    }

    async fn finalize(&self, ctx: &RequestContext, paid: Versioned<Order>) -> Result<Order, Error> {
        let order_id = paid.record.id;
        let committed: Result<(), Error> = paid.record.items.iter().try_for_each(|item| {
            let mut reservation = Reservation::held_for(item);
            self.inventory.commit(&mut reservation)
        });

        let completed = match committed {
            Ok(()) => self.write_status(&paid, OrderStatus::Completed).await,
            Err(cause) => Err(cause),
        };

        match completed {
            Ok(completed) => {
                info!(%order_id, "order completed");
                publish_committed(
                    self.events.as_ref(),
                    CommerceEvent::order_completed(
                        order_id,
                        completed.record.user_id,
                        completed.record.total,
                        completed.record.updated_at,
                    ),
                )
                .await;
                Ok(completed.record)
            }
            Err(cause) => {
                error!(%order_id, error = %cause, "order finalization failed");
                match self.record_failure(ctx, order_id).await {
                    Ok(failed) => {
                        warn!(%order_id, "order marked failed; compensating");
                        self.release_items(ctx, &failed.items).await;
                        self.refund(ctx, failed.user_id, failed.total).await;
                        self.restore_coupon(ctx, &failed).await;
                        Err(annotate(cause, &failed))
                    }
                    Err(write_error) => {
                        // Stock, payment and coupon stay taken until the row
                        // is reconciled by hand.
                        error!(
                            %order_id,
                            user_id = %paid.record.user_id,
                            total = %paid.record.total,
                            error = %write_error,
                            "order stuck in PAID; resources left held for reconciliation",
                        );
                        Err(annotate(cause, &paid.record))
                    }
                }
            }
        }
    }

    /// Move a `PAID` order to `FAILED`, re-reading on version conflicts.
    async fn record_failure(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order, Error> {
        let ctx = ctx.detached();
        self.retry
            .run(&ctx, "record_order_failure", |_| async move {
                let current = self.orders.read(order_id).await?;
                if current.record.status == OrderStatus::Failed {
                    return Ok(current.record);
                }
                let failed = current
                    .record
                    .transition(OrderStatus::Failed, self.clock.utc())
                    .map_err(AttemptError::Fatal)?;
                self.orders
                    .compare_and_swap(order_id, current.version, failed.clone())
                    .await?;
                Ok(failed)
            })
            .await
    }

    async fn cancel_locked(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, Error> {
        let current = self.orders.read(order_id).await?;
        ensure_owner(&current.record, user_id)?;
        if current.record.status != OrderStatus::StockReserved {
            return Err(Error::invalid_state(format!(
                "{order_id} cannot be cancelled while {:?}",
                current.record.status
            )));
        }
        self.cancel_reserved(ctx, &current).await
    }

    async fn cancel_reserved(
        &self,
        ctx: &RequestContext,
        current: &Versioned<Order>,
    ) -> Result<Order, Error> {
        let cancelled = self.write_status(current, OrderStatus::Cancelled).await?;
        let order = cancelled.record;
        self.release_items(ctx, &order.items).await;
        self.restore_coupon(ctx, &order).await;

        info!(order_id = %order.id, "order cancelled");
        publish_committed(
            self.events.as_ref(),
            CommerceEvent::order_cancelled(order.id, order.user_id, order.updated_at),
        )
        .await;
        Ok(order)
    }

    async fn price_lines(&self, lines: &[OrderLine]) -> Result<Vec<OrderItem>, Error> {
        let merged = merge_lines(lines)?;
        let mut items = Vec::with_capacity(merged.len());
        for (product_id, quantity) in merged {
            let product = self.products.read(product_id).await?.record;
            items.push(OrderItem {
                product_id,
                quantity,
                unit_price: product.unit_price,
            });
        }
        Ok(items)
    }

    async fn write_status(
        &self,
        current: &Versioned<Order>,
        next: OrderStatus,
    ) -> Result<Versioned<Order>, Error> {
        let updated = current.record.transition(next, self.clock.utc())?;
        let version = self
            .orders
            .compare_and_swap(updated.id, current.version, updated.clone())
            .await?;
        Ok(Versioned::new(updated, version))
    }

    async fn fail_creation(&self, created: &Versioned<Order>, cause: Error) -> Error {
        match self.write_status(created, OrderStatus::Failed).await {
            Ok(failed) => {
                info!(order_id = %failed.record.id, code = ?cause.code(), "order failed at creation");
                annotate(cause, &failed.record)
            }
            Err(write_error) => {
                error!(order_id = %created.record.id, error = %write_error, "could not record order failure");
                annotate(cause, &created.record)
            }
        }
    }

    async fn undo_creation(
        &self,
        ctx: &RequestContext,
        order: &Order,
        reservations: &mut [Reservation],
    ) {
        warn!(order_id = %order.id, "order creation aborted; compensating");
        self.release_reservations(ctx, reservations).await;
        self.restore_coupon(ctx, order).await;
    }

    async fn release_reservations(&self, ctx: &RequestContext, reservations: &mut [Reservation]) {
        let ctx = ctx.detached();
        for reservation in reservations.iter_mut() {
            if let Err(cause) = self.inventory.release(&ctx, reservation).await {
                error!(
                    product_id = %reservation.product_id(),
                    quantity = reservation.quantity(),
                    error = %cause,
                    "stock release failed during compensation",
                );
            }
        }
    }

    async fn release_items(&self, ctx: &RequestContext, items: &[OrderItem]) {
        let mut reservations: Vec<Reservation> = items.iter().map(Reservation::held_for).collect();
        self.release_reservations(ctx, &mut reservations).await;
    }

    async fn refund(&self, ctx: &RequestContext, user_id: UserId, amount: Money) {
        if amount.is_zero() {
            return;
        }
        if let Err(cause) = self.ledger.credit(&ctx.detached(), user_id, amount).await {
            error!(%user_id, %amount, error = %cause, "refund failed during compensation");
        }
    }

    async fn restore_coupon(&self, ctx: &RequestContext, order: &Order) {
        let Some(coupon_id) = order.coupon_id else {
            return;
        };
        if let Err(cause) = self
            .coupons
            .restore(&ctx.detached(), order.user_id, coupon_id, order.id)
            .await
        {
            error!(order_id = %order.id, %coupon_id, error = %cause, "coupon restore failed during compensation");
        }
    }
}

fn ensure_owner(order: &Order, user_id: UserId) -> Result<(), Error> {
    if order.user_id != user_id {
        return Err(Error::forbidden(format!(
            "{} does not belong to {user_id}",
            order.id
        )));
    }
    Ok(())
}

fn annotate(cause: Error, order: &Order) -> Error {
    let mut details = cause.details().cloned().unwrap_or_else(|| json!({}));
    if let Value::Object(map) = &mut details {
        map.insert("orderId".to_owned(), json!(order.id));
        map.insert("orderStatus".to_owned(), json!(order.status));
    }
    cause.with_details(details)
}

#[cfg(test)]
#[path = "order_state_machine_tests.rs"]
mod tests;
