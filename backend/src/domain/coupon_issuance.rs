//! Capped coupon issuance with a per-user guard.
//!
//! Issuance runs under a `coupon:<id>` lease with a short wait. Inside the
//! lease the service checks for an existing grant, validates availability,
//! and commits the counter increment together with the grant insert. The
//! `CouponIssued` event goes out only after that commit.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::locking::{LockManager, ResourceKey};
use crate::domain::ports::{CouponGrantStore, EventPublisher, StoreError, VersionedStore};
use crate::domain::{
    CommerceEvent, Coupon, CouponId, CouponStatus, Error, OrderId, RequestContext, UserCoupon,
    UserId, events::publish_committed,
};

/// Store and runtime dependencies of [`CouponIssuanceService`].
pub struct CouponIssuancePorts {
    /// Coupon rows.
    pub coupons: Arc<dyn VersionedStore<Coupon>>,
    /// Per-user grants.
    pub grants: Arc<dyn CouponGrantStore>,
    /// Lease manager.
    pub locks: Arc<LockManager>,
    /// Committed-event sink.
    pub events: Arc<dyn EventPublisher>,
    /// Wall clock for validity windows and timestamps.
    pub clock: Arc<dyn Clock>,
}

/// Coupon issuance and redemption service.
pub struct CouponIssuanceService {
    coupons: Arc<dyn VersionedStore<Coupon>>,
    grants: Arc<dyn CouponGrantStore>,
    locks: Arc<LockManager>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    lock_wait: Duration,
}

impl CouponIssuanceService {
    /// Build the service. `lock_wait` bounds the wait for the coupon lease.
    pub fn new(ports: CouponIssuancePorts, lock_wait: Duration) -> Self {
        Self {
            coupons: ports.coupons,
            grants: ports.grants,
            locks: ports.locks,
            events: ports.events,
            clock: ports.clock,
            lock_wait,
        }
    }

    /// Issue one grant of `coupon_id` to `user_id`.
    ///
    /// Outcomes: the new grant, `AlreadyIssued`, `LimitExceeded`,
    /// `CouponUnavailable`, `NotFound`, or `LockTimeout` when the lease
    /// could not be taken in time.
    pub async fn issue(
        &self,
        ctx: &RequestContext,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<UserCoupon, Error> {
        let grant = self
            .locks
            .with_lock(ctx, ResourceKey::coupon(coupon_id), self.lock_wait, || {
                self.issue_locked(coupon_id, user_id)
            })
            .await?;

        info!(%coupon_id, %user_id, "coupon issued");
        publish_committed(
            self.events.as_ref(),
            CommerceEvent::coupon_issued(coupon_id, user_id, grant.issued_at),
        )
        .await;
        Ok(grant)
    }

    async fn issue_locked(&self, coupon_id: CouponId, user_id: UserId) -> Result<UserCoupon, Error> {
        if self.grants.find_grant(user_id, coupon_id).await?.is_some() {
            debug!(%coupon_id, %user_id, "duplicate issuance refused");
            return Err(already_issued(coupon_id, user_id));
        }

        let current = self.coupons.read(coupon_id).await?;
        let now = self.clock.utc();
        let coupon = &current.record;
        // An exhausted cap wins over the window and kill switch.
        if coupon.remaining() == 0 {
            return Err(limit_exceeded(coupon));
        }
        match coupon.status(now) {
            CouponStatus::Active => {}
            CouponStatus::SoldOut => return Err(limit_exceeded(coupon)),
            status => {
                return Err(
                    Error::coupon_unavailable(format!("{coupon_id} is not issuable"))
                        .with_details(json!({ "couponId": coupon_id, "status": status })),
                );
            }
        }
        let Some(next) = coupon.with_one_more_issued() else {
            return Err(limit_exceeded(coupon));
        };

        let grant = UserCoupon::issued(user_id, coupon_id, now);
        match self
            .grants
            .commit_issuance(coupon_id, current.version, next, grant.clone())
            .await
        {
            Ok(_) => Ok(grant),
            Err(StoreError::AlreadyExists { .. }) => Err(already_issued(coupon_id, user_id)),
            Err(error) => Err(error.into()),
        }
    }

    /// Apply a held grant to `order_id` and return its discount in basis
    /// points.
    ///
    /// Fails with `CouponUnavailable` when the user holds no usable grant or
    /// the coupon is disabled or expired.
    pub async fn redeem(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        coupon_id: CouponId,
        order_id: OrderId,
    ) -> Result<u32, Error> {
        let coupon = self.coupons.read(coupon_id).await?.record;
        match coupon.status(self.clock.utc()) {
            CouponStatus::Active | CouponStatus::SoldOut => {}
            status => {
                return Err(
                    Error::coupon_unavailable(format!("{coupon_id} can no longer be redeemed"))
                        .with_details(json!({ "couponId": coupon_id, "status": status })),
                );
            }
        }

        let marked = match self
            .grants
            .mark_grant_used(user_id, coupon_id, order_id)
            .await
        {
            Ok(marked) => marked,
            Err(StoreError::NotFound { .. }) => {
                return Err(Error::coupon_unavailable(format!(
                    "{user_id} does not hold {coupon_id}"
                )));
            }
            Err(error) => return Err(error.into()),
        };
        if !marked {
            return Err(Error::coupon_unavailable(format!(
                "{coupon_id} was already used by {user_id}"
            )));
        }

        info!(%coupon_id, %user_id, %order_id, "coupon redeemed");
        Ok(coupon.effective_bps())
    }

    /// Undo [`Self::redeem`] for `order_id`. Returns whether a grant moved.
    pub async fn restore(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        coupon_id: CouponId,
        order_id: OrderId,
    ) -> Result<bool, Error> {
        let restored = self
            .grants
            .restore_grant(user_id, coupon_id, order_id)
            .await?;
        if restored {
            info!(%coupon_id, %user_id, %order_id, "coupon grant restored");
        } else {
            warn!(%coupon_id, %user_id, %order_id, "no grant to restore for order");
        }
        Ok(restored)
    }
}

fn already_issued(coupon_id: CouponId, user_id: UserId) -> Error {
    Error::already_issued(format!("{user_id} already holds {coupon_id}"))
}

fn limit_exceeded(coupon: &Coupon) -> Error {
    Error::limit_exceeded(format!("{} is sold out", coupon.id)).with_details(json!({
        "couponId": coupon.id,
        "totalQuantity": coupon.total_quantity,
        "issuedCount": coupon.issued_count,
    }))
}

#[cfg(test)]
#[path = "coupon_issuance_tests.rs"]
mod tests;
