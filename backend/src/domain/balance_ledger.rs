//! Debit and credit of user balances with a non-negative invariant.
//!
//! Every mutation is a read-compare-and-swap through the retry executor and
//! returns a [`BalanceChange`] for audit.

use std::sync::Arc;

use mockable::Clock;
use serde_json::json;
use tracing::info;

use crate::domain::ports::{EventPublisher, StoreError, VersionedStore};
use crate::domain::retry::{AttemptError, OptimisticRetryExecutor};
use crate::domain::{
    Balance, BalanceChange, CommerceEvent, Error, Money, RequestContext, UserId,
    events::publish_committed,
};

/// Smallest accepted top-up.
pub const MIN_CHARGE: Money = Money::new(1_000);
/// Largest accepted top-up.
pub const MAX_CHARGE: Money = Money::new(1_000_000);

/// Balance ledger service.
pub struct BalanceLedger {
    balances: Arc<dyn VersionedStore<Balance>>,
    retry: Arc<OptimisticRetryExecutor>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl BalanceLedger {
    pub fn new(
        balances: Arc<dyn VersionedStore<Balance>>,
        retry: Arc<OptimisticRetryExecutor>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            balances,
            retry,
            events,
            clock,
        }
    }

    /// Current spendable amount.
    pub async fn balance(&self, user_id: UserId) -> Result<Money, Error> {
        Ok(self.balances.read(user_id).await?.record.amount)
    }

    /// Take `amount` from the user's balance.
    ///
    /// Fails terminally with `InsufficientBalance` when the balance is
    /// smaller; the balance is then untouched.
    pub async fn debit(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        amount: Money,
    ) -> Result<BalanceChange, Error> {
        ensure_positive(amount)?;
        let change = self
            .retry
            .run(ctx, "debit_balance", |_| async move {
                let current = self.balances.read(user_id).await?;
                let before = current.record.amount;
                let Some(after) = before.checked_sub(amount) else {
                    return Err(AttemptError::Fatal(
                        Error::insufficient_balance(format!(
                            "{user_id} has {before}, {amount} required"
                        ))
                        .with_details(json!({
                            "userId": user_id,
                            "available": before,
                            "required": amount,
                        })),
                    ));
                };
                let version = self
                    .balances
                    .compare_and_swap(user_id, current.version, Balance::new(user_id, after))
                    .await?;
                Ok(BalanceChange {
                    user_id,
                    before,
                    after,
                    version,
                })
            })
            .await?;

        info!(%user_id, %amount, after = %change.after, version = %change.version, "balance debited");
        Ok(change)
    }

    /// Add `amount` to the user's balance, creating the row if needed.
    ///
    /// Unbounded; used for compensation and by [`Self::charge`].
    pub async fn credit(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        amount: Money,
    ) -> Result<BalanceChange, Error> {
        ensure_positive(amount)?;
        let change = self
            .retry
            .run(ctx, "credit_balance", |_| async move {
                let current = match self.balances.read(user_id).await {
                    Ok(current) => current,
                    Err(StoreError::NotFound { .. }) => {
                        return self.open_balance(user_id, amount).await;
                    }
                    Err(error) => return Err(error.into()),
                };
                let before = current.record.amount;
                let after = before.checked_add(amount).ok_or_else(|| {
                    AttemptError::Fatal(Error::invalid_request(format!(
                        "crediting {amount} would overflow {user_id}"
                    )))
                })?;
                let version = self
                    .balances
                    .compare_and_swap(user_id, current.version, Balance::new(user_id, after))
                    .await?;
                Ok(BalanceChange {
                    user_id,
                    before,
                    after,
                    version,
                })
            })
            .await?;

        info!(%user_id, %amount, after = %change.after, version = %change.version, "balance credited");
        Ok(change)
    }

    /// User-facing top-up bounded to `MIN_CHARGE..=MAX_CHARGE`.
    pub async fn charge(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        amount: Money,
    ) -> Result<BalanceChange, Error> {
        if !(MIN_CHARGE..=MAX_CHARGE).contains(&amount) {
            return Err(Error::invalid_request(format!(
                "charge must be between {MIN_CHARGE} and {MAX_CHARGE}"
            ))
            .with_details(json!({
                "amount": amount,
                "min": MIN_CHARGE,
                "max": MAX_CHARGE,
            })));
        }

        let change = self.credit(ctx, user_id, amount).await?;
        publish_committed(
            self.events.as_ref(),
            CommerceEvent::balance_charged(user_id, amount, change.after, self.clock.utc()),
        )
        .await;
        Ok(change)
    }

    async fn open_balance(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<BalanceChange, AttemptError> {
        match self.balances.insert(Balance::new(user_id, amount)).await {
            Ok(version) => Ok(BalanceChange {
                user_id,
                before: Money::ZERO,
                after: amount,
                version,
            }),
            // Another flow opened the row first; retry against it.
            Err(StoreError::AlreadyExists { .. }) => {
                Err(AttemptError::Conflict(StoreError::version_conflict(0_u64, 1_u64)))
            }
            Err(error) => Err(error.into()),
        }
    }
}

fn ensure_positive(amount: Money) -> Result<(), Error> {
    if amount.is_zero() {
        return Err(Error::invalid_request("amount must be positive"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "balance_ledger_tests.rs"]
mod tests;
