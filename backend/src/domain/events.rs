//! Domain events published after the state they describe has committed.
//!
//! Delivery is at-least-once. Every event carries a unique `event_id` so
//! consumers can drop duplicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::ports::EventPublisher;
use super::{CouponId, Money, OrderId, UserId};

/// Committed business transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommerceEvent {
    /// A coupon grant was issued to a user.
    CouponIssued {
        #[serde(rename = "eventId")]
        event_id: Uuid,
        #[serde(rename = "couponId")]
        coupon_id: CouponId,
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
    },
    /// A user topped up their balance.
    BalanceCharged {
        #[serde(rename = "eventId")]
        event_id: Uuid,
        #[serde(rename = "userId")]
        user_id: UserId,
        amount: Money,
        #[serde(rename = "balanceAfter")]
        balance_after: Money,
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
    },
    /// An order reached `COMPLETED`.
    OrderCompleted {
        #[serde(rename = "eventId")]
        event_id: Uuid,
        #[serde(rename = "orderId")]
        order_id: OrderId,
        #[serde(rename = "userId")]
        user_id: UserId,
        total: Money,
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
    },
    /// An order reached `CANCELLED`.
    OrderCancelled {
        #[serde(rename = "eventId")]
        event_id: Uuid,
        #[serde(rename = "orderId")]
        order_id: OrderId,
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
    },
}

impl CommerceEvent {
    /// Unique id for consumer-side de-duplication.
    pub fn event_id(&self) -> Uuid {
        match self {
            Self::CouponIssued { event_id, .. }
            | Self::BalanceCharged { event_id, .. }
            | Self::OrderCompleted { event_id, .. }
            | Self::OrderCancelled { event_id, .. } => *event_id,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CouponIssued { .. } => "coupon_issued",
            Self::BalanceCharged { .. } => "balance_charged",
            Self::OrderCompleted { .. } => "order_completed",
            Self::OrderCancelled { .. } => "order_cancelled",
        }
    }

    pub(crate) fn coupon_issued(coupon_id: CouponId, user_id: UserId, at: DateTime<Utc>) -> Self {
        Self::CouponIssued {
            event_id: Uuid::new_v4(),
            coupon_id,
            user_id,
            occurred_at: at,
        }
    }

    pub(crate) fn balance_charged(
        user_id: UserId,
        amount: Money,
        balance_after: Money,
        at: DateTime<Utc>,
    ) -> Self {
        Self::BalanceCharged {
            event_id: Uuid::new_v4(),
            user_id,
            amount,
            balance_after,
            occurred_at: at,
        }
    }

    pub(crate) fn order_completed(
        order_id: OrderId,
        user_id: UserId,
        total: Money,
        at: DateTime<Utc>,
    ) -> Self {
        Self::OrderCompleted {
            event_id: Uuid::new_v4(),
            order_id,
            user_id,
            total,
            occurred_at: at,
        }
    }

    pub(crate) fn order_cancelled(order_id: OrderId, user_id: UserId, at: DateTime<Utc>) -> Self {
        Self::OrderCancelled {
            event_id: Uuid::new_v4(),
            order_id,
            user_id,
            occurred_at: at,
        }
    }
}

/// Publish a committed event, logging instead of failing when the transport
/// refuses it.
pub(crate) async fn publish_committed(publisher: &dyn EventPublisher, event: CommerceEvent) {
    if let Err(error) = publisher.publish(&event).await {
        warn!(
            kind = event.kind(),
            event_id = %event.event_id(),
            %error,
            "event publish failed after commit",
        );
    }
}
