//! Orders and their status lifecycle.
//!
//! ```text
//! CREATED ─reserve─▶ STOCK_RESERVED ─debit─▶ PAID ─finalize─▶ COMPLETED
//!    │                    │                   │
//!    └─▶ FAILED ◀─────────┤                   └─▶ FAILED
//!                         └─▶ CANCELLED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CouponId, Error, Money, OrderId, ProductId, UserId, VersionedRecord};

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Persisted, stock not yet reserved.
    Created,
    /// Stock held for every line.
    StockReserved,
    /// Balance debited.
    Paid,
    /// Reservation committed. Terminal.
    Completed,
    /// Cancelled before payment with stock released. Terminal.
    Cancelled,
    /// Failed with any held resources compensated. Terminal.
    Failed,
}

impl OrderStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: Self) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, StockReserved)
                | (Created, Failed)
                | (StockReserved, Paid)
                | (StockReserved, Cancelled)
                | (StockReserved, Failed)
                | (Paid, Completed)
                | (Paid, Failed)
        )
    }
}

/// One order line with the price captured when the order was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Ordered product.
    pub product_id: ProductId,
    /// Units ordered.
    pub quantity: u32,
    /// Unit price snapshot.
    pub unit_price: Money,
}

impl OrderItem {
    /// Line total, or `None` on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Requested order line before prices are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    /// Product to buy.
    pub product_id: ProductId,
    /// Units to buy.
    pub quantity: u32,
}

impl OrderLine {
    /// Build a requested line.
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A buyer's order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,
    /// Buyer.
    pub user_id: UserId,
    /// Lines with price snapshots.
    pub items: Vec<OrderItem>,
    /// Coupon applied to the order, if any.
    pub coupon_id: Option<CouponId>,
    /// Lifecycle state.
    pub status: OrderStatus,
    /// Sum of line totals.
    pub subtotal: Money,
    /// Coupon discount.
    pub discount: Money,
    /// Amount to debit.
    pub total: Money,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a `CREATED` order, summing line totals into the subtotal.
    pub fn create(
        id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
        coupon_id: Option<CouponId>,
        now: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let subtotal = sum_lines(&items)?;

        Ok(Self {
            id,
            user_id,
            items,
            coupon_id,
            status: OrderStatus::Created,
            subtotal,
            discount: Money::ZERO,
            total: subtotal,
            created_at: now,
            updated_at: now,
        })
    }

    /// Copy of this order over `items`, repricing the subtotal and clearing
    /// any discount.
    pub fn with_items(&self, items: Vec<OrderItem>) -> Result<Self, Error> {
        let subtotal = sum_lines(&items)?;
        Ok(Self {
            items,
            subtotal,
            discount: Money::ZERO,
            total: subtotal,
            ..self.clone()
        })
    }

    /// Copy of this order with a discount of `bps` applied to the subtotal.
    pub fn with_discount_bps(&self, bps: u32) -> Self {
        let discount = self.subtotal.discount_bps(bps);
        Self {
            discount,
            total: self.subtotal.saturating_sub(discount),
            ..self.clone()
        }
    }

    /// Copy of this order moved to `next`, refusing edges outside the graph.
    pub fn transition(&self, next: OrderStatus, now: DateTime<Utc>) -> Result<Self, Error> {
        if !self.status.can_transition_to(next) {
            return Err(Error::invalid_state(format!(
                "order {} cannot move from {:?} to {next:?}",
                self.id, self.status
            )));
        }
        Ok(Self {
            status: next,
            updated_at: now,
            ..self.clone()
        })
    }
}

fn sum_lines(items: &[OrderItem]) -> Result<Money, Error> {
    items
        .iter()
        .try_fold(Money::ZERO, |acc, item| {
            item.line_total().and_then(|line| acc.checked_add(line))
        })
        .ok_or_else(|| Error::invalid_request("order total overflows"))
}

impl VersionedRecord for Order {
    type Id = OrderId;
    const KIND: &'static str = "order";

    fn id(&self) -> Self::Id {
        self.id
    }
}
