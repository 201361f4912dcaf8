//! Limited-quantity coupons and per-user grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CouponId, OrderId, UserId, VersionedRecord, money::BPS_SCALE};

/// Derived availability of a coupon at a point in time.
///
/// Variants are listed in precedence order: a disabled coupon reports
/// `Disabled` even when it is also expired or sold out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus {
    /// Switched off by an operator.
    Disabled,
    /// Past the end of the validity window.
    Expired,
    /// The issuance cap has been reached.
    SoldOut,
    /// Before the start of the validity window.
    Inactive,
    /// Issuable.
    Active,
}

/// A coupon with a fixed issuance cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    /// Coupon identifier.
    pub id: CouponId,
    /// Display name.
    pub name: String,
    /// Issuance cap, fixed at creation.
    pub total_quantity: u32,
    /// Grants issued so far.
    pub issued_count: u32,
    /// Discount in basis points (`0..=10_000`).
    pub discount_bps: u32,
    /// Start of the validity window.
    pub starts_at: DateTime<Utc>,
    /// End of the validity window.
    pub ends_at: DateTime<Utc>,
    /// Operator kill switch.
    pub disabled: bool,
}

impl Coupon {
    /// Availability at `now`.
    pub fn status(&self, now: DateTime<Utc>) -> CouponStatus {
        if self.disabled {
            CouponStatus::Disabled
        } else if now > self.ends_at {
            CouponStatus::Expired
        } else if self.issued_count >= self.total_quantity {
            CouponStatus::SoldOut
        } else if now < self.starts_at {
            CouponStatus::Inactive
        } else {
            CouponStatus::Active
        }
    }

    /// Grants still available.
    pub fn remaining(&self) -> u32 {
        self.total_quantity.saturating_sub(self.issued_count)
    }

    /// Copy of this row with one more grant counted, or `None` at the cap.
    pub fn with_one_more_issued(&self) -> Option<Self> {
        if self.issued_count >= self.total_quantity {
            return None;
        }
        Some(Self {
            issued_count: self.issued_count + 1,
            ..self.clone()
        })
    }

    /// Discount rate clamped to 100%.
    pub fn effective_bps(&self) -> u32 {
        self.discount_bps.min(BPS_SCALE)
    }
}

impl VersionedRecord for Coupon {
    type Id = CouponId;
    const KIND: &'static str = "coupon";

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Lifecycle of a user's grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Issued and not yet applied to an order.
    Issued,
    /// Applied to an order.
    Used,
}

/// One user's grant of one coupon. At most one exists per `(user, coupon)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCoupon {
    /// Holder.
    pub user_id: UserId,
    /// Granted coupon.
    pub coupon_id: CouponId,
    /// Current grant state.
    pub status: GrantStatus,
    /// Issuance timestamp.
    pub issued_at: DateTime<Utc>,
    /// Order the grant was applied to, when used.
    pub used_order_id: Option<OrderId>,
}

impl UserCoupon {
    /// Build a freshly issued grant.
    pub fn issued(user_id: UserId, coupon_id: CouponId, issued_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            coupon_id,
            status: GrantStatus::Issued,
            issued_at,
            used_order_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::{fixture, rstest};

    #[fixture]
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid fixture time")
    }

    fn coupon(now: DateTime<Utc>) -> Coupon {
        Coupon {
            id: CouponId::new(1),
            name: "spring".to_owned(),
            total_quantity: 2,
            issued_count: 0,
            discount_bps: 1_000,
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(1),
            disabled: false,
        }
    }

    #[rstest]
    fn open_window_with_stock_is_active(now: DateTime<Utc>) {
        assert_eq!(coupon(now).status(now), CouponStatus::Active);
    }

    #[rstest]
    fn disabled_wins_over_sold_out(now: DateTime<Utc>) {
        let row = Coupon {
            disabled: true,
            issued_count: 2,
            ..coupon(now)
        };
        assert_eq!(row.status(now), CouponStatus::Disabled);
    }

    #[rstest]
    fn expired_wins_over_sold_out(now: DateTime<Utc>) {
        let row = Coupon {
            issued_count: 2,
            ..coupon(now)
        };
        assert_eq!(row.status(now + Duration::hours(2)), CouponStatus::Expired);
        assert_eq!(row.status(now), CouponStatus::SoldOut);
    }

    #[rstest]
    fn future_window_is_inactive(now: DateTime<Utc>) {
        assert_eq!(
            coupon(now).status(now - Duration::hours(2)),
            CouponStatus::Inactive
        );
    }

    #[rstest]
    fn increment_stops_at_cap(now: DateTime<Utc>) {
        let once = coupon(now).with_one_more_issued().expect("below cap");
        let twice = once.with_one_more_issued().expect("at cap after this");
        assert_eq!(twice.remaining(), 0);
        assert!(twice.with_one_more_issued().is_none());
    }
}
