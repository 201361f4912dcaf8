//! Driven port for the external lease coordination service.
//!
//! A coordinator hands out time-bounded leases on string keys. Leases are
//! owned by a [`FlowId`]; the owner may re-acquire a lease it already holds,
//! which bumps a hold counter instead of blocking. Expiry frees leases whose
//! holder vanished.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Error, FlowId, ResourceKey};

use super::define_port_error;

define_port_error! {
    /// Errors raised by lock coordinator adapters.
    pub enum LockCoordinatorError {
        /// Coordinator connection could not be established.
        Connection { message: String } => "lock coordinator connection failed: {message}",
        /// Coordinator answered with something unexpected.
        Protocol { message: String } => "lock coordinator protocol error: {message}",
    }
}

impl From<LockCoordinatorError> for Error {
    fn from(err: LockCoordinatorError) -> Self {
        match err {
            LockCoordinatorError::Connection { message } => Error::service_unavailable(message),
            LockCoordinatorError::Protocol { message } => Error::internal(message),
        }
    }
}

/// Proof of lease ownership handed back on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    /// Mint a new random token.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for LeaseToken {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Port for leased mutual exclusion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Try once to take or re-enter the lease on `key`.
    ///
    /// Returns `None` while another owner holds an unexpired lease. A
    /// re-entrant acquisition returns the existing token and extends the
    /// lease to `lease` from now.
    async fn try_acquire(
        &self,
        key: &ResourceKey,
        owner: FlowId,
        lease: Duration,
    ) -> Result<Option<LeaseToken>, LockCoordinatorError>;

    /// Drop one hold on `key`.
    ///
    /// The lease is freed when the last hold goes. Returns `false` when the
    /// token no longer matches, which happens after the lease expired and
    /// someone else took it.
    async fn release(
        &self,
        key: &ResourceKey,
        owner: FlowId,
        token: LeaseToken,
    ) -> Result<bool, LockCoordinatorError>;
}
