//! Lease coordinator adapters.
//!
//! - **in_memory**: single-process coordinator with clock-driven expiry
//! - **redis**: Lua-scripted leases on a pooled Redis connection (`bb8-redis`)

mod in_memory;
mod redis;

pub use in_memory::InMemoryLockCoordinator;
pub use redis::{RedisLockConfig, RedisLockCoordinator};
