//! Runtime configuration loaded via OrthoConfig.
//!
//! Every knob is optional; accessors fall back to the defaults the services
//! were tuned for. Values come from `COMMERCE_*` environment variables,
//! configuration files, or command-line flags.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{LockSettings, ReservationStrategy, RetryPolicy};

const DEFAULT_LOCK_LEASE_MS: u64 = 10_000;
const DEFAULT_LOCK_WAIT_MS: u64 = 5_000;
const DEFAULT_COUPON_LOCK_WAIT_MS: u64 = 3_000;
const DEFAULT_LOCK_POLL_MS: u64 = 10;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
const DEFAULT_MAX_BACKOFF_MS: u64 = 1_000;
const DEFAULT_EVENT_BUFFER: usize = 1_024;

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("invalid reservation strategy: {0}")]
    Strategy(String),
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
}

/// Tunables for the locking, retry, and reservation behaviour.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "COMMERCE")]
pub struct CommerceSettings {
    /// `lock` (default) or `optimistic`.
    pub reservation_strategy: Option<String>,
    /// Lease length for every lock, in milliseconds.
    pub lock_lease_ms: Option<u64>,
    /// Default wait for a contended lock, in milliseconds.
    pub lock_wait_ms: Option<u64>,
    /// Wait for the coupon issuance lock, in milliseconds.
    pub coupon_lock_wait_ms: Option<u64>,
    /// Delay between acquisition attempts, in milliseconds.
    pub lock_poll_ms: Option<u64>,
    /// Total optimistic attempts including the first.
    pub retry_max_attempts: Option<u32>,
    /// Backoff before the second attempt, in milliseconds.
    pub retry_initial_backoff_ms: Option<u64>,
    /// Cap on any single backoff, in milliseconds.
    pub retry_max_backoff_ms: Option<u64>,
    /// Overall per-request deadline, in milliseconds. Unbounded when unset.
    pub request_timeout_ms: Option<u64>,
    /// Redis endpoint for the distributed lock coordinator. The in-process
    /// coordinator is used when unset.
    pub redis_url: Option<String>,
    /// Capacity of the broadcast event channel.
    pub event_buffer: Option<usize>,
}

impl CommerceSettings {
    /// Configured reservation strategy.
    pub fn reservation_strategy(&self) -> Result<ReservationStrategy, SettingsError> {
        self.reservation_strategy
            .as_deref()
            .map_or(Ok(ReservationStrategy::default()), |raw| {
                raw.parse().map_err(SettingsError::Strategy)
            })
    }

    /// Lease, wait and poll settings for the lock manager.
    pub fn lock_settings(&self) -> Result<LockSettings, SettingsError> {
        Ok(LockSettings {
            lease: millis(self.lock_lease_ms, DEFAULT_LOCK_LEASE_MS, "lock_lease_ms")?,
            wait_timeout: millis(self.lock_wait_ms, DEFAULT_LOCK_WAIT_MS, "lock_wait_ms")?,
            poll_interval: millis(self.lock_poll_ms, DEFAULT_LOCK_POLL_MS, "lock_poll_ms")?,
        })
    }

    /// Wait budget for the coupon issuance lock.
    pub fn coupon_lock_wait(&self) -> Result<Duration, SettingsError> {
        millis(
            self.coupon_lock_wait_ms,
            DEFAULT_COUPON_LOCK_WAIT_MS,
            "coupon_lock_wait_ms",
        )
    }

    /// Attempt count and backoff shape for the retry executor.
    pub fn retry_policy(&self) -> Result<RetryPolicy, SettingsError> {
        let max_attempts = self.retry_max_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS);
        if max_attempts == 0 {
            return Err(SettingsError::NotPositive {
                field: "retry_max_attempts",
            });
        }
        Ok(RetryPolicy {
            max_attempts,
            initial_backoff: millis(
                self.retry_initial_backoff_ms,
                DEFAULT_INITIAL_BACKOFF_MS,
                "retry_initial_backoff_ms",
            )?,
            max_backoff: millis(
                self.retry_max_backoff_ms,
                DEFAULT_MAX_BACKOFF_MS,
                "retry_max_backoff_ms",
            )?,
        })
    }

    /// Per-request deadline, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Redis endpoint, if configured.
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Broadcast channel capacity.
    pub fn event_buffer(&self) -> usize {
        self.event_buffer
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_EVENT_BUFFER)
    }
}

fn millis(value: Option<u64>, default: u64, field: &'static str) -> Result<Duration, SettingsError> {
    match value.unwrap_or(default) {
        0 => Err(SettingsError::NotPositive { field }),
        ms => Ok(Duration::from_millis(ms)),
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for commerce configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 11] = [
        "COMMERCE_RESERVATION_STRATEGY",
        "COMMERCE_LOCK_LEASE_MS",
        "COMMERCE_LOCK_WAIT_MS",
        "COMMERCE_COUPON_LOCK_WAIT_MS",
        "COMMERCE_LOCK_POLL_MS",
        "COMMERCE_RETRY_MAX_ATTEMPTS",
        "COMMERCE_RETRY_INITIAL_BACKOFF_MS",
        "COMMERCE_RETRY_MAX_BACKOFF_MS",
        "COMMERCE_REQUEST_TIMEOUT_MS",
        "COMMERCE_REDIS_URL",
        "COMMERCE_EVENT_BUFFER",
    ];

    fn load_from_empty_args() -> CommerceSettings {
        CommerceSettings::load_from_iter([OsString::from("flash-sale")])
            .expect("config should load")
    }

    fn unset() -> CommerceSettings {
        CommerceSettings {
            reservation_strategy: None,
            lock_lease_ms: None,
            lock_wait_ms: None,
            coupon_lock_wait_ms: None,
            lock_poll_ms: None,
            retry_max_attempts: None,
            retry_initial_backoff_ms: None,
            retry_max_backoff_ms: None,
            request_timeout_ms: None,
            redis_url: None,
            event_buffer: None,
        }
    }

    fn env_with(overrides: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        VARS.iter()
            .map(|name| {
                let value = overrides
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| (*value).to_owned());
                (*name, value)
            })
            .collect()
    }

    #[rstest]
    fn defaults_apply_when_unset() {
        let _guard = lock_env(env_with(&[]));

        let settings = load_from_empty_args();
        assert_eq!(
            settings.reservation_strategy(),
            Ok(ReservationStrategy::Lock)
        );
        assert_eq!(settings.lock_settings(), Ok(LockSettings::default()));
        assert_eq!(settings.retry_policy(), Ok(RetryPolicy::default()));
        assert_eq!(settings.coupon_lock_wait(), Ok(Duration::from_secs(3)));
        assert_eq!(settings.request_timeout(), None);
        assert_eq!(settings.redis_url(), None);
        assert_eq!(settings.event_buffer(), DEFAULT_EVENT_BUFFER);
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env(env_with(&[
            ("COMMERCE_RESERVATION_STRATEGY", "lock"),
            ("COMMERCE_LOCK_WAIT_MS", "250"),
            ("COMMERCE_RETRY_MAX_ATTEMPTS", "5"),
            ("COMMERCE_REQUEST_TIMEOUT_MS", "2000"),
            ("COMMERCE_REDIS_URL", "redis://127.0.0.1:6379"),
        ]));

        let settings = load_from_empty_args();
        assert_eq!(settings.reservation_strategy(), Ok(ReservationStrategy::Lock));
        assert_eq!(
            settings.lock_settings().map(|locks| locks.wait_timeout),
            Ok(Duration::from_millis(250))
        );
        assert_eq!(
            settings.retry_policy().map(|policy| policy.max_attempts),
            Ok(5)
        );
        assert_eq!(settings.request_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(settings.redis_url(), Some("redis://127.0.0.1:6379"));
    }

    #[rstest]
    #[case(CommerceSettings { reservation_strategy: Some("pessimistic".into()), ..unset() })]
    fn unknown_strategy_is_rejected(#[case] settings: CommerceSettings) {
        assert!(matches!(
            settings.reservation_strategy(),
            Err(SettingsError::Strategy(_))
        ));
    }

    #[rstest]
    #[case(CommerceSettings { retry_max_attempts: Some(0), ..unset() }, "retry_max_attempts")]
    #[case(CommerceSettings { lock_poll_ms: Some(0), ..unset() }, "lock_poll_ms")]
    fn zero_durations_and_attempts_are_rejected(
        #[case] settings: CommerceSettings,
        #[case] field: &'static str,
    ) {
        let err = settings
            .retry_policy()
            .and_then(|_| settings.lock_settings())
            .expect_err("zero is invalid");
        assert_eq!(err, SettingsError::NotPositive { field });
    }
}
