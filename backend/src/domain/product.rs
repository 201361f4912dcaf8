//! Sellable product rows.

use serde::{Deserialize, Serialize};

use super::{Money, ProductId, VersionedRecord};

/// A product with finite stock.
///
/// `stock_quantity` is unsigned, so the non-negative invariant is carried by
/// the type; writers use [`Product::take_stock`] to decrement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Product identifier.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Current unit price.
    pub unit_price: Money,
    /// Units available for reservation.
    pub stock_quantity: u32,
}

impl Product {
    /// Build a product row.
    pub fn new(id: ProductId, name: impl Into<String>, unit_price: Money, stock: u32) -> Self {
        Self {
            id,
            name: name.into(),
            unit_price,
            stock_quantity: stock,
        }
    }

    /// Copy of this row with `quantity` fewer units, or `None` if short.
    pub fn take_stock(&self, quantity: u32) -> Option<Self> {
        let remaining = self.stock_quantity.checked_sub(quantity)?;
        Some(Self {
            stock_quantity: remaining,
            ..self.clone()
        })
    }

    /// Copy of this row with `quantity` units returned.
    pub fn return_stock(&self, quantity: u32) -> Self {
        Self {
            stock_quantity: self.stock_quantity.saturating_add(quantity),
            ..self.clone()
        }
    }
}

impl VersionedRecord for Product {
    type Id = ProductId;
    const KIND: &'static str = "product";

    fn id(&self) -> Self::Id {
        self.id
    }
}
