//! Driving port for commerce mutations.
//!
//! Request routing and status mapping live outside the core; they call this
//! port and branch on [`crate::domain::ErrorCode`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    BalanceChange, CouponId, Error, Money, Order, OrderId, OrderLine, RequestContext, UserCoupon,
    UserId,
};

/// Request to place an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub items: Vec<OrderLine>,
    pub coupon_id: Option<CouponId>,
}

/// Request to pay for, or cancel, an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderActionRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
}

/// Request to issue a coupon grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCouponRequest {
    pub coupon_id: CouponId,
    pub user_id: UserId,
}

/// Request to top up a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeBalanceRequest {
    pub user_id: UserId,
    pub amount: Money,
}

/// Driving port for the order, coupon, and balance flows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommerceCommand: Send + Sync {
    /// Create an order and reserve its stock.
    ///
    /// Fails with `OutOfStock` when any line cannot be reserved; the order is
    /// then persisted as `FAILED` and its id is attached to the error details.
    async fn create_order(
        &self,
        ctx: &RequestContext,
        request: CreateOrderRequest,
    ) -> Result<Order, Error>;

    /// Debit the buyer and complete a `STOCK_RESERVED` order.
    async fn pay_order(
        &self,
        ctx: &RequestContext,
        request: OrderActionRequest,
    ) -> Result<Order, Error>;

    /// Cancel a `STOCK_RESERVED` order and release its stock.
    async fn cancel_order(
        &self,
        ctx: &RequestContext,
        request: OrderActionRequest,
    ) -> Result<Order, Error>;

    /// Issue one coupon grant to a user.
    async fn issue_coupon(
        &self,
        ctx: &RequestContext,
        request: IssueCouponRequest,
    ) -> Result<UserCoupon, Error>;

    /// Top up a user's balance.
    async fn charge_balance(
        &self,
        ctx: &RequestContext,
        request: ChargeBalanceRequest,
    ) -> Result<BalanceChange, Error>;
}
