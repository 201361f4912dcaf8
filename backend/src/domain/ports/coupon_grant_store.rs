//! Driven port for coupon grants.
//!
//! The issuance counter on the coupon row and the per-user grant must change
//! together, so the coupon CAS and the grant insert are one store call.

use async_trait::async_trait;

use crate::domain::{CouponId, Coupon, OrderId, UserCoupon, UserId, Version};

use super::StoreError;

/// Port for per-user coupon grants.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponGrantStore: Send + Sync {
    /// Look up the grant held by `user_id` for `coupon_id`.
    async fn find_grant(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
    ) -> Result<Option<UserCoupon>, StoreError>;

    /// Swap in `coupon` at `expected` and insert `grant` atomically.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the user already holds a
    /// grant and with [`StoreError::VersionConflict`] when the coupon moved.
    /// Neither write happens on failure.
    async fn commit_issuance(
        &self,
        coupon_id: CouponId,
        expected: Version,
        coupon: Coupon,
        grant: UserCoupon,
    ) -> Result<Version, StoreError>;

    /// Move an `Issued` grant to `Used` for `order_id`.
    ///
    /// Returns `false` when the grant is not currently `Issued`.
    async fn mark_grant_used(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
        order_id: OrderId,
    ) -> Result<bool, StoreError>;

    /// Move a grant used by `order_id` back to `Issued`.
    ///
    /// Returns `false` when the grant is not held by that order.
    async fn restore_grant(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
        order_id: OrderId,
    ) -> Result<bool, StoreError>;
}
