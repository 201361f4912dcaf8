//! Resource keys addressed by leases.

use std::fmt;

use crate::domain::{CouponId, OrderId, ProductId, UserId};

/// Name of one lockable resource, such as `product:42`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Key for a product's stock.
    pub fn product(id: ProductId) -> Self {
        Self(id.to_string())
    }

    /// Key for a coupon's issuance counter.
    pub fn coupon(id: CouponId) -> Self {
        Self(id.to_string())
    }

    /// Key for a user's balance.
    pub fn balance(user: UserId) -> Self {
        Self(format!("balance:{}", user.get()))
    }

    /// Key for an order's payment.
    pub fn order(id: OrderId) -> Self {
        Self(id.to_string())
    }

    /// Sort and de-duplicate keys into the global acquisition order.
    ///
    /// Every flow that needs several leases takes them in this order, so no
    /// two flows can each hold a key the other is waiting for.
    pub fn ordered(keys: impl IntoIterator<Item = Self>) -> Vec<Self> {
        let mut keys: Vec<Self> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Raw key text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
