//! Domain service implementing the commerce command port.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::ports::{
    ChargeBalanceRequest, CommerceCommand, CreateOrderRequest, IssueCouponRequest,
    OrderActionRequest,
};
use crate::domain::{
    BalanceChange, BalanceLedger, CouponIssuanceService, Error, Order, OrderStateMachine,
    RequestContext, UserCoupon,
};

/// Routes commands to the order, coupon and balance services.
#[derive(Clone)]
pub struct CommerceCommandService {
    orders: Arc<OrderStateMachine>,
    coupons: Arc<CouponIssuanceService>,
    ledger: Arc<BalanceLedger>,
}

impl CommerceCommandService {
    pub fn new(
        orders: Arc<OrderStateMachine>,
        coupons: Arc<CouponIssuanceService>,
        ledger: Arc<BalanceLedger>,
    ) -> Self {
        Self {
            orders,
            coupons,
            ledger,
        }
    }
}

#[async_trait]
impl CommerceCommand for CommerceCommandService {
    async fn create_order(
        &self,
        ctx: &RequestContext,
        request: CreateOrderRequest,
    ) -> Result<Order, Error> {
        debug!(flow = %ctx.flow(), user_id = %request.user_id, lines = request.items.len(), "create_order");
        self.orders
            .create_order(ctx, request.user_id, &request.items, request.coupon_id)
            .await
    }

    async fn pay_order(
        &self,
        ctx: &RequestContext,
        request: OrderActionRequest,
    ) -> Result<Order, Error> {
        debug!(flow = %ctx.flow(), order_id = %request.order_id, "pay_order");
        self.orders
            .pay_order(ctx, request.order_id, request.user_id)
            .await
    }

    async fn cancel_order(
        &self,
        ctx: &RequestContext,
        request: OrderActionRequest,
    ) -> Result<Order, Error> {
        debug!(flow = %ctx.flow(), order_id = %request.order_id, "cancel_order");
        self.orders
            .cancel_order(ctx, request.order_id, request.user_id)
            .await
    }

    async fn issue_coupon(
        &self,
        ctx: &RequestContext,
        request: IssueCouponRequest,
    ) -> Result<UserCoupon, Error> {
        debug!(flow = %ctx.flow(), coupon_id = %request.coupon_id, user_id = %request.user_id, "issue_coupon");
        self.coupons
            .issue(ctx, request.coupon_id, request.user_id)
            .await
    }

    async fn charge_balance(
        &self,
        ctx: &RequestContext,
        request: ChargeBalanceRequest,
    ) -> Result<BalanceChange, Error> {
        debug!(flow = %ctx.flow(), user_id = %request.user_id, amount = %request.amount, "charge_balance");
        self.ledger
            .charge(ctx, request.user_id, request.amount)
            .await
    }
}
