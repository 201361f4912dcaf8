//! Redis-backed lease coordinator.
//!
//! Each lease is a hash at `<prefix><resource>` holding `owner`, `token` and
//! a `holds` counter, with `PEXPIRE` as the lease. Acquire and release are Lua
//! scripts so the check-and-set runs atomically on the server.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::redis::{RedisError, Script};
use tracing::debug;
use uuid::Uuid;

use crate::domain::ports::{LeaseToken, LockCoordinator, LockCoordinatorError};
use crate::domain::{FlowId, ResourceKey};

const ACQUIRE_SCRIPT: &str = r"
local owner = redis.call('HGET', KEYS[1], 'owner')
if not owner then
  redis.call('HSET', KEYS[1], 'owner', ARGV[1], 'token', ARGV[2], 'holds', 1)
  redis.call('PEXPIRE', KEYS[1], ARGV[3])
  return ARGV[2]
end
if owner == ARGV[1] then
  redis.call('HINCRBY', KEYS[1], 'holds', 1)
  redis.call('PEXPIRE', KEYS[1], ARGV[3])
  return redis.call('HGET', KEYS[1], 'token')
end
return false
";

const RELEASE_SCRIPT: &str = r"
local token = redis.call('HGET', KEYS[1], 'token')
if (not token) or token ~= ARGV[2] then
  return 0
end
if redis.call('HGET', KEYS[1], 'owner') ~= ARGV[1] then
  return 0
end
local holds = redis.call('HINCRBY', KEYS[1], 'holds', -1)
if holds <= 0 then
  redis.call('DEL', KEYS[1])
end
return 1
";

/// Connection settings for the Redis coordinator.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use commerce_backend::outbound::locking::RedisLockConfig;
///
/// let config = RedisLockConfig::new("redis://127.0.0.1:6379")
///     .with_key_prefix("shop:lock:")
///     .with_max_size(32)
///     .with_connection_timeout(Duration::from_secs(2));
/// assert_eq!(config.key_prefix(), "shop:lock:");
/// ```
#[derive(Debug, Clone)]
pub struct RedisLockConfig {
    redis_url: String,
    key_prefix: String,
    max_size: u32,
    connection_timeout: Duration,
}

impl RedisLockConfig {
    /// Configuration with defaults: prefix `lock:`, 16 connections, 5 s
    /// checkout timeout.
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            key_prefix: "lock:".to_owned(),
            max_size: 16,
            connection_timeout: Duration::from_secs(5),
        }
    }

    /// Set the key namespace prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the maximum number of pooled connections.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the connection checkout timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Redis URL.
    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }

    /// Key namespace prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

/// [`LockCoordinator`] backed by a pooled Redis connection.
#[derive(Clone)]
pub struct RedisLockCoordinator {
    pool: Pool<RedisConnectionManager>,
    key_prefix: String,
    acquire: Script,
    release: Script,
}

impl RedisLockCoordinator {
    /// Connect and build the pool.
    ///
    /// # Errors
    ///
    /// Returns `LockCoordinatorError::Connection` when the URL is invalid or
    /// the initial connections cannot be established.
    pub async fn connect(config: RedisLockConfig) -> Result<Self, LockCoordinatorError> {
        let manager = RedisConnectionManager::new(config.redis_url.as_str())
            .map_err(|err| LockCoordinatorError::connection(err.to_string()))?;
        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|err| LockCoordinatorError::connection(err.to_string()))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            acquire: Script::new(ACQUIRE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    fn redis_key(&self, key: &ResourceKey) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, LockCoordinatorError> {
        self.pool
            .get()
            .await
            .map_err(|err| LockCoordinatorError::connection(err.to_string()))
    }
}

fn map_redis_error(err: RedisError) -> LockCoordinatorError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
        LockCoordinatorError::connection(err.to_string())
    } else {
        LockCoordinatorError::protocol(err.to_string())
    }
}

fn lease_millis(lease: Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn parse_token(raw: &str) -> Result<LeaseToken, LockCoordinatorError> {
    Uuid::parse_str(raw)
        .map(LeaseToken::from)
        .map_err(|err| LockCoordinatorError::protocol(format!("malformed lease token: {err}")))
}

#[async_trait]
impl LockCoordinator for RedisLockCoordinator {
    async fn try_acquire(
        &self,
        key: &ResourceKey,
        owner: FlowId,
        lease: Duration,
    ) -> Result<Option<LeaseToken>, LockCoordinatorError> {
        let redis_key = self.redis_key(key);
        let candidate = LeaseToken::random();
        let mut conn = self.connection().await?;
        let granted: Option<String> = self
            .acquire
            .key(&redis_key)
            .arg(owner.to_string())
            .arg(candidate.to_string())
            .arg(lease_millis(lease))
            .invoke_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;

        debug!(key = %redis_key, granted = granted.is_some(), "redis lease attempt");
        granted.as_deref().map(parse_token).transpose()
    }

    async fn release(
        &self,
        key: &ResourceKey,
        owner: FlowId,
        token: LeaseToken,
    ) -> Result<bool, LockCoordinatorError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.connection().await?;
        let released: i64 = self
            .release
            .key(&redis_key)
            .arg(owner.to_string())
            .arg(token.to_string())
            .invoke_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;
        Ok(released == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn config_defaults() {
        let config = RedisLockConfig::new("redis://localhost");
        assert_eq!(config.redis_url(), "redis://localhost");
        assert_eq!(config.key_prefix(), "lock:");
        assert_eq!(config.max_size, 16);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }

    #[rstest]
    #[case(Duration::ZERO, 1)]
    #[case(Duration::from_millis(250), 250)]
    #[case(Duration::from_secs(10), 10_000)]
    fn lease_is_sent_in_whole_millis(#[case] lease: Duration, #[case] expected: u64) {
        assert_eq!(lease_millis(lease), expected);
    }

    #[rstest]
    fn tokens_parse_from_uuid_text() {
        let token = LeaseToken::random();
        assert_eq!(parse_token(&token.to_string()).expect("valid"), token);
        assert!(matches!(
            parse_token("nope"),
            Err(LockCoordinatorError::Protocol { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn invalid_url_is_a_connection_error() {
        let result = RedisLockCoordinator::connect(RedisLockConfig::new("not a url")).await;
        assert!(matches!(
            result,
            Err(LockCoordinatorError::Connection { .. })
        ));
    }
}
