//! Version-stamped records shared by every store adapter.
//!
//! Every committed write bumps the [`Version`] by exactly one. Writers present
//! the version they read; a mismatch means someone else committed first.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Monotonic row version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version assigned to a freshly inserted row.
    pub const INITIAL: Self = Self(1);

    /// Wrap a raw version number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw version number.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The version a successful write produces.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A record paired with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Record snapshot.
    pub record: T,
    /// Version of the snapshot.
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Pair a record with its version.
    pub fn new(record: T, version: Version) -> Self {
        Self { record, version }
    }
}

/// Rows that live in a versioned store.
pub trait VersionedRecord: Clone + Send + Sync + 'static {
    /// Key type addressing one row.
    type Id: Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Short kind label used in logs and error messages.
    const KIND: &'static str;

    /// Key of this row.
    fn id(&self) -> Self::Id;
}
