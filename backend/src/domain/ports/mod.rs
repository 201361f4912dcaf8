//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod commerce_command;
mod coupon_grant_store;
mod event_publisher;
mod lock_coordinator;
mod versioned_store;

#[cfg(test)]
pub use commerce_command::MockCommerceCommand;
pub use commerce_command::{
    ChargeBalanceRequest, CommerceCommand, CreateOrderRequest, IssueCouponRequest,
    OrderActionRequest,
};
pub use coupon_grant_store::CouponGrantStore;
#[cfg(test)]
pub use coupon_grant_store::MockCouponGrantStore;
#[cfg(test)]
pub use event_publisher::MockEventPublisher;
pub use event_publisher::{EventPublisher, EventPublisherError, FixtureEventPublisher};
#[cfg(test)]
pub use lock_coordinator::MockLockCoordinator;
pub use lock_coordinator::{LeaseToken, LockCoordinator, LockCoordinatorError};
pub use versioned_store::{StoreError, VersionedStore};
