//! Versioned-record persistence adapters.
//!
//! The core only needs read-with-version and compare-and-swap semantics; the
//! adapters here provide them in process. A database-backed adapter plugs in
//! behind the same [`crate::domain::ports::VersionedStore`] port.

mod in_memory;
mod in_memory_coupon;

pub use in_memory::InMemoryVersionedStore;
pub use in_memory_coupon::InMemoryCouponStore;
