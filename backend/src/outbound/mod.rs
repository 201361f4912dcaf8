//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: in-process versioned stores for products, coupons,
//!   balances, and orders
//! - **locking**: lease coordinators (in-memory and Redis via `bb8-redis`)
//! - **events**: tokio broadcast fan-out for committed domain events
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod events;
pub mod locking;
pub mod persistence;
