//! Strongly typed identifiers for the commerce aggregates.
//!
//! Catalogue rows (products, coupons, balances) are keyed by numeric ids
//! assigned outside the core. Orders are created per request and use random
//! UUIDs.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw numeric identifier.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Access the raw numeric value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, ":{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a sellable product.
    ProductId,
    "product"
);
numeric_id!(
    /// Identifier of a limited-quantity coupon.
    CouponId,
    "coupon"
);
numeric_id!(
    /// Identifier of a buyer account.
    UserId,
    "user"
);

/// Identifier of an order created by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Generate a fresh random order id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for OrderId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order:{}", self.0)
    }
}

/// Identity of one logical request flow.
///
/// Lock ownership is tracked per flow so that the same flow may re-acquire a
/// resource it already holds without deadlocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(Uuid);

impl FlowId {
    /// Generate a fresh flow identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn numeric_ids_display_with_kind_prefix() {
        assert_eq!(ProductId::new(42).to_string(), "product:42");
        assert_eq!(CouponId::new(7).to_string(), "coupon:7");
        assert_eq!(UserId::new(3).to_string(), "user:3");
    }

    #[rstest]
    fn numeric_ids_serialise_transparently() {
        let value = serde_json::to_value(ProductId::new(9)).expect("serialise id");
        assert_eq!(value, serde_json::json!(9));
    }

    #[rstest]
    fn random_flows_are_distinct() {
        assert_ne!(FlowId::random(), FlowId::random());
    }
}
