//! Domain primitives, aggregates and services.
//!
//! Purpose: define the strongly typed records the concurrency core guards
//! (products, coupons, balances, orders) and the services that mutate them
//! under optimistic versioning or leased locks. Services reach storage, lock
//! coordination and event delivery only through the traits in [`ports`].
//!
//! Public surface:
//! - Error (alias to `error::Error`) with its stable `ErrorCode`.
//! - Identifiers, `Money`, `Version` and `Versioned<T>`.
//! - `InventoryService`, `CouponIssuanceService`, `BalanceLedger` and
//!   `OrderStateMachine`, fronted by `CommerceCommandService`.

pub mod balance;
pub mod balance_ledger;
pub mod commerce_command_service;
pub mod context;
pub mod coupon;
pub mod coupon_issuance;
pub mod error;
pub mod events;
pub mod ids;
pub mod inventory;
pub mod locking;
pub mod money;
pub mod order;
pub mod order_state_machine;
pub mod ports;
pub mod product;
pub mod retry;
pub mod versioned;

pub use self::balance::{Balance, BalanceChange};
pub use self::balance_ledger::{BalanceLedger, MAX_CHARGE, MIN_CHARGE};
pub use self::commerce_command_service::CommerceCommandService;
pub use self::context::RequestContext;
pub use self::coupon::{Coupon, CouponStatus, GrantStatus, UserCoupon};
pub use self::coupon_issuance::{CouponIssuancePorts, CouponIssuanceService};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::events::CommerceEvent;
pub use self::ids::{CouponId, FlowId, OrderId, ProductId, UserId};
pub use self::inventory::{InventoryService, Reservation, ReservationState, ReservationStrategy};
pub use self::locking::{LockHandle, LockManager, LockSettings, ResourceKey};
pub use self::money::Money;
pub use self::order::{Order, OrderItem, OrderLine, OrderStatus};
pub use self::order_state_machine::{OrderCollaborators, OrderPorts, OrderStateMachine};
pub use self::product::Product;
pub use self::retry::{
    AttemptError, BackoffJitter, OptimisticRetryExecutor, RetryPolicy, RetryRuntime, RetrySleeper,
};
pub use self::versioned::{Version, Versioned, VersionedRecord};
