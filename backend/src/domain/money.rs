//! Integer money amounts in the smallest currency unit.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Basis points denominator (100% = 10 000 bps).
pub const BPS_SCALE: u32 = 10_000;

/// Non-negative amount of money in minor units.
///
/// # Examples
/// ```
/// use commerce_backend::domain::Money;
///
/// let price = Money::new(1_999);
/// assert_eq!(price.checked_mul(3), Some(Money::new(5_997)));
/// assert_eq!(Money::new(1_000).discount_bps(1_250), Money::new(125));
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// The zero amount.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw minor-unit amount.
    pub const fn new(minor_units: u64) -> Self {
        Self(minor_units)
    }

    /// Raw minor-unit amount.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this amount is zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Add, returning `None` on overflow.
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Subtract, returning `None` when the result would be negative.
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Multiply by a quantity, returning `None` on overflow.
    pub fn checked_mul(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(u64::from(quantity)).map(Self)
    }

    /// Subtract, clamping at zero.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Portion of this amount covered by `bps` basis points, rounded down.
    ///
    /// Rates above 100% are clamped to the full amount.
    pub fn discount_bps(self, bps: u32) -> Self {
        let bps = u128::from(bps.min(BPS_SCALE));
        let discounted = u128::from(self.0) * bps / u128::from(BPS_SCALE);
        // bps <= scale keeps the product within u64.
        Self(u64::try_from(discounted).unwrap_or(self.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
