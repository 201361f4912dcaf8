//! Optimistic retry executor for version-conflicted read-modify-write loops.
//!
//! An operation re-reads fresh state on every attempt and reports a
//! [`AttemptError::Conflict`] when its compare-and-swap lost. Conflicts are
//! retried with capped, jittered exponential backoff; everything else passes
//! straight through.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::ports::StoreError;
use crate::domain::{Error, RequestContext};

mod runtime;

pub use runtime::{RandomJitter, RetryRuntime, TokioSleeper};

/// Retry attempt count and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay before jitter.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after the given failed attempt (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let base_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(u64::from(exponent)).min(max_ms))
    }
}

/// Outcome of one failed attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Lost a compare-and-swap race; a fresh attempt may succeed.
    Conflict(StoreError),
    /// Anything else; surfaced immediately.
    Fatal(Error),
}

impl From<Error> for AttemptError {
    fn from(err: Error) -> Self {
        Self::Fatal(err)
    }
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        if err.is_conflict() {
            Self::Conflict(err)
        } else {
            Self::Fatal(err.into())
        }
    }
}

/// Async sleeping abstraction for retry delays.
#[async_trait]
pub trait RetrySleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Retry backoff jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return a jittered delay from the exponential base delay.
    ///
    /// ```rust
    /// use commerce_backend::domain::BackoffJitter;
    /// use chrono::{TimeZone, Utc};
    /// use std::time::Duration;
    /// struct Fixed;
    /// impl BackoffJitter for Fixed {
    ///     fn jittered_delay(&self, base: Duration, attempt: u32, _now: chrono::DateTime<chrono::Utc>) -> Duration {
    ///         base + Duration::from_millis(u64::from(attempt))
    ///     }
    /// }
    /// let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid time");
    /// assert_eq!(Fixed.jittered_delay(Duration::from_millis(100), 2, now), Duration::from_millis(102));
    /// ```
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration;
}

/// Runs version-checked operations until they commit or the budget runs out.
pub struct OptimisticRetryExecutor {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn RetrySleeper>,
    jitter: Arc<dyn BackoffJitter>,
}

impl OptimisticRetryExecutor {
    /// Build an executor using tokio sleeps and random jitter.
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self::with_runtime(policy, clock, RetryRuntime::default())
    }

    /// Build an executor with injected runtime abstractions.
    pub fn with_runtime(policy: RetryPolicy, clock: Arc<dyn Clock>, runtime: RetryRuntime) -> Self {
        Self {
            policy,
            clock,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
        }
    }

    /// Active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt_fn` until it succeeds, fails fatally, or conflicts are
    /// exhausted.
    ///
    /// The closure receives the 1-based attempt number and must re-read any
    /// state it depends on. Exhaustion surfaces as `RetryExhausted` with the
    /// last conflict in the error details. Retrying also stops early when
    /// the next backoff would overrun the context deadline.
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        mut attempt_fn: F,
    ) -> Result<T, Error>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, AttemptError>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_conflict: Option<StoreError> = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Conflict(cause)) => {
                    debug!(operation, attempt, %cause, "optimistic write lost a race");
                    last_conflict = Some(cause);
                    if attempt == max_attempts {
                        break;
                    }

                    let base = self.policy.base_delay(attempt);
                    let delay = self.jitter.jittered_delay(base, attempt, self.clock.utc());
                    if ctx.remaining().is_some_and(|remaining| delay >= remaining) {
                        debug!(operation, attempt, "deadline leaves no room for another attempt");
                        break;
                    }
                    self.sleeper.sleep(delay).await;
                }
            }
        }

        warn!(operation, attempts, "optimistic retries exhausted");
        let cause = last_conflict.map(|cause| cause.to_string());
        Err(Error::retry_exhausted(format!(
            "{operation} kept conflicting after {attempts} attempts"
        ))
        .with_details(json!({
            "operation": operation,
            "attempts": attempts,
            "lastConflict": cause,
        })))
    }
}

#[cfg(test)]
mod tests;
