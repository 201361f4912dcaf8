//! Default runtime helpers for the retry executor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{BackoffJitter, RetrySleeper};

/// Runtime helpers used by retry policy.
pub struct RetryRuntime {
    /// Async sleep implementation.
    pub sleeper: Arc<dyn RetrySleeper>,
    /// Jitter strategy for retry delays.
    pub jitter: Arc<dyn BackoffJitter>,
}

impl Default for RetryRuntime {
    fn default() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter::from_entropy()),
        }
    }
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl RetrySleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Adds up to a quarter of the base delay, drawn uniformly.
///
/// Spreads simultaneous losers of the same race so they do not collide again
/// on the next attempt.
pub struct RandomJitter(Mutex<SmallRng>);

impl RandomJitter {
    /// Seed from OS entropy.
    pub fn from_entropy() -> Self {
        Self(Mutex::new(SmallRng::from_entropy()))
    }

    /// Deterministic sequence for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self(Mutex::new(SmallRng::seed_from_u64(seed)))
    }
}

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = base_ms / 4;
        let extra = match self.0.lock() {
            Ok(mut rng) => rng.gen_range(0..=max_extra),
            // A poisoned generator only loses the spread, not the delay.
            Err(_) => 0,
        };
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}
