//! Driven port for version-checked record storage.
//!
//! Writers read a row together with its [`Version`], compute the successor
//! row, and hand both back through [`VersionedStore::compare_and_swap`]. The
//! store commits only if nobody else has written in between, so a whole-row
//! swap is the unit of atomicity and partial writes cannot happen.

use async_trait::async_trait;

use crate::domain::{Error, Version, Versioned, VersionedRecord};

use super::define_port_error;

define_port_error! {
    /// Errors raised by versioned store adapters.
    pub enum StoreError {
        /// No row exists for the key.
        NotFound { key: String } => "record not found: {key}",
        /// A row already exists for the key.
        AlreadyExists { key: String } => "record already exists: {key}",
        /// The row was written by someone else since it was read.
        VersionConflict { expected: u64, actual: u64 } =>
            "version conflict: expected {expected}, found {actual}",
        /// Store connection could not be established.
        Connection { message: String } => "store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "store query failed: {message}",
    }
}

impl StoreError {
    /// Whether a fresh read-modify-write may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    pub(crate) fn conflict_between(expected: Version, actual: Version) -> Self {
        Self::version_conflict(expected.get(), actual.get())
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => Error::not_found(format!("{key} not found")),
            StoreError::AlreadyExists { key } => {
                Error::internal(format!("{key} was inserted twice"))
            }
            StoreError::VersionConflict { expected, actual } => Error::retry_exhausted(format!(
                "concurrent update: expected version {expected}, found {actual}"
            )),
            StoreError::Connection { message } => Error::service_unavailable(message),
            StoreError::Query { message } => Error::internal(message),
        }
    }
}

/// Port for read-with-version and compare-and-swap writes over one record
/// kind.
#[async_trait]
pub trait VersionedStore<R: VersionedRecord>: Send + Sync {
    /// Read the current row and its version.
    async fn read(&self, id: R::Id) -> Result<Versioned<R>, StoreError>;

    /// Insert a new row at [`Version::INITIAL`].
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the key is taken.
    async fn insert(&self, record: R) -> Result<Version, StoreError>;

    /// Replace the row only if it is still at `expected`.
    ///
    /// Returns the new version on success and
    /// [`StoreError::VersionConflict`] when another writer got there first.
    async fn compare_and_swap(
        &self,
        id: R::Id,
        expected: Version,
        record: R,
    ) -> Result<Version, StoreError>;
}
