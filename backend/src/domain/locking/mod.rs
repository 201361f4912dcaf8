//! Distributed lock manager over a [`LockCoordinator`].
//!
//! Leases are owned by the [`RequestContext`] flow, so nested acquisition of
//! the same key by one flow re-enters instead of deadlocking. Waiting is a
//! poll loop bounded by the wait timeout and the context deadline; expiry on
//! the coordinator side frees leases whose holder disappeared.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::ports::{LeaseToken, LockCoordinator};
use crate::domain::{Error, FlowId, RequestContext};

mod key;

pub use key::ResourceKey;

/// Lease and wait defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// How long a lease lives without release.
    pub lease: Duration,
    /// How long `acquire` waits before `LockTimeout`.
    pub wait_timeout: Duration,
    /// Delay between acquisition attempts while waiting.
    pub poll_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// An acquired lease. Release it through [`LockManager::release`].
#[derive(Debug)]
pub struct LockHandle {
    key: ResourceKey,
    owner: FlowId,
    token: LeaseToken,
    released: AtomicBool,
}

impl LockHandle {
    /// Leased resource.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Coordinator token proving ownership.
    pub fn token(&self) -> LeaseToken {
        self.token
    }

    /// Whether [`LockManager::release`] already ran for this handle.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// Leased mutual exclusion keyed by resource.
pub struct LockManager {
    coordinator: Arc<dyn LockCoordinator>,
    settings: LockSettings,
}

impl LockManager {
    /// Build a manager over `coordinator`.
    pub fn new(coordinator: Arc<dyn LockCoordinator>, settings: LockSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    /// Active defaults.
    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Acquire `key`, waiting up to `wait_timeout` (clamped to the deadline).
    ///
    /// Fails with `LockTimeout` when the wait runs out and with
    /// `ServiceUnavailable` when the coordinator cannot be reached.
    pub async fn acquire(
        &self,
        ctx: &RequestContext,
        key: ResourceKey,
        lease: Duration,
        wait_timeout: Duration,
    ) -> Result<LockHandle, Error> {
        let wait = ctx.clamp(wait_timeout);
        let started = Instant::now();
        let mut polls: u32 = 0;

        loop {
            polls = polls.saturating_add(1);
            let attempt = self.coordinator.try_acquire(&key, ctx.flow(), lease).await;
            match attempt {
                Ok(Some(token)) => {
                    debug!(%key, flow = %ctx.flow(), polls, "lease acquired");
                    return Ok(LockHandle {
                        key,
                        owner: ctx.flow(),
                        token,
                        released: AtomicBool::new(false),
                    });
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(%key, %error, "lock coordinator failed during acquire");
                    return Err(error.into());
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= wait {
                let waited_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                debug!(%key, polls, waited_ms, "lease wait timed out");
                return Err(
                    Error::lock_timeout(format!("timed out waiting for {key}")).with_details(
                        json!({ "resource": key.as_str(), "waitedMs": waited_ms }),
                    ),
                );
            }
            tokio::time::sleep(self.settings.poll_interval.min(wait - elapsed)).await;
        }
    }

    /// Release a lease. Idempotent; failures are logged, never returned.
    pub async fn release(&self, handle: &LockHandle) {
        if handle.released.swap(true, Ordering::AcqRel) {
            return;
        }
        match self
            .coordinator
            .release(&handle.key, handle.owner, handle.token)
            .await
        {
            Ok(true) => debug!(key = %handle.key, "lease released"),
            Ok(false) => warn!(key = %handle.key, "lease had already expired before release"),
            Err(error) => warn!(key = %handle.key, %error, "lease release failed; expiry will free it"),
        }
    }

    /// Run `op` while holding `key` with the default lease, releasing on
    /// every exit path.
    pub async fn with_lock<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        key: ResourceKey,
        wait_timeout: Duration,
        op: F,
    ) -> Result<T, Error>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, Error>> + Send,
        T: Send,
    {
        let handle = self
            .acquire(ctx, key, self.settings.lease, wait_timeout)
            .await?;
        let outcome = op().await;
        self.release(&handle).await;
        outcome
    }

    /// Acquire every key in global order, all or nothing.
    ///
    /// On failure the leases already taken are released before returning.
    pub async fn acquire_all(
        &self,
        ctx: &RequestContext,
        keys: impl IntoIterator<Item = ResourceKey>,
        wait_timeout: Duration,
    ) -> Result<Vec<LockHandle>, Error> {
        let ordered = ResourceKey::ordered(keys);
        let mut held = Vec::with_capacity(ordered.len());
        for key in ordered {
            match self
                .acquire(ctx, key, self.settings.lease, wait_timeout)
                .await
            {
                Ok(handle) => held.push(handle),
                Err(error) => {
                    self.release_all(&held).await;
                    return Err(error);
                }
            }
        }
        Ok(held)
    }

    /// Release handles in reverse acquisition order.
    pub async fn release_all(&self, handles: &[LockHandle]) {
        for handle in handles.iter().rev() {
            self.release(handle).await;
        }
    }
}

#[cfg(test)]
mod tests;
