//! Process-local lease coordinator.
//!
//! Leases expire against the injected [`Clock`], so tests can age them
//! without sleeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::ports::{LeaseToken, LockCoordinator, LockCoordinatorError};
use crate::domain::{FlowId, ResourceKey};

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: FlowId,
    token: LeaseToken,
    holds: u32,
    expires_at: DateTime<Utc>,
}

/// In-memory [`LockCoordinator`].
pub struct InMemoryLockCoordinator {
    leases: Mutex<HashMap<ResourceKey, Lease>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockCoordinator {
    /// Build a coordinator reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of unexpired leases.
    pub fn active_leases(&self) -> usize {
        let now = self.clock.utc();
        self.leases
            .lock()
            .map(|leases| leases.values().filter(|lease| lease.expires_at > now).count())
            .unwrap_or_default()
    }

    fn lock_leases(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ResourceKey, Lease>>, LockCoordinatorError> {
        self.leases
            .lock()
            .map_err(|_| LockCoordinatorError::protocol("lease table mutex poisoned"))
    }
}

fn expiry(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    let lease = TimeDelta::from_std(lease).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl LockCoordinator for InMemoryLockCoordinator {
    async fn try_acquire(
        &self,
        key: &ResourceKey,
        owner: FlowId,
        lease: Duration,
    ) -> Result<Option<LeaseToken>, LockCoordinatorError> {
        let now = self.clock.utc();
        let mut leases = self.lock_leases()?;

        if let Some(current) = leases.get_mut(key) {
            if current.expires_at > now {
                if current.owner != owner {
                    return Ok(None);
                }
                current.holds = current.holds.saturating_add(1);
                current.expires_at = expiry(now, lease);
                return Ok(Some(current.token));
            }
        }

        let token = LeaseToken::random();
        leases.insert(
            key.clone(),
            Lease {
                owner,
                token,
                holds: 1,
                expires_at: expiry(now, lease),
            },
        );
        Ok(Some(token))
    }

    async fn release(
        &self,
        key: &ResourceKey,
        owner: FlowId,
        token: LeaseToken,
    ) -> Result<bool, LockCoordinatorError> {
        let mut leases = self.lock_leases()?;
        let Some(current) = leases.get_mut(key) else {
            return Ok(false);
        };
        if current.token != token || current.owner != owner {
            return Ok(false);
        }
        current.holds = current.holds.saturating_sub(1);
        if current.holds == 0 {
            leases.remove(key);
        }
        Ok(true)
    }
}
