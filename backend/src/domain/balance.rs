//! Per-user spendable balances.

use serde::{Deserialize, Serialize};

use super::{Money, UserId, Version, VersionedRecord};

/// A user's balance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    /// Owner of the balance.
    pub user_id: UserId,
    /// Spendable amount.
    pub amount: Money,
}

impl Balance {
    /// Build a balance row.
    pub fn new(user_id: UserId, amount: Money) -> Self {
        Self { user_id, amount }
    }
}

impl VersionedRecord for Balance {
    type Id = UserId;
    const KIND: &'static str = "balance";

    fn id(&self) -> Self::Id {
        self.user_id
    }
}

/// Audit record returned by every committed balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    /// Affected user.
    pub user_id: UserId,
    /// Amount before the mutation.
    pub before: Money,
    /// Amount after the mutation.
    pub after: Money,
    /// Row version written by the mutation.
    pub version: Version,
}
