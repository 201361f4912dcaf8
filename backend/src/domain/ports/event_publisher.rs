//! Driven port for outbound domain events.

use async_trait::async_trait;

use crate::domain::CommerceEvent;

use super::define_port_error;

define_port_error! {
    /// Errors raised by event publisher adapters.
    pub enum EventPublisherError {
        /// The transport refused or dropped the event.
        Unavailable { message: String } => "event transport unavailable: {message}",
    }
}

/// Port for publishing committed [`CommerceEvent`]s.
///
/// Services call this only after the state change has committed and never
/// fail the operation when publishing fails.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event.
    async fn publish(&self, event: &CommerceEvent) -> Result<(), EventPublisherError>;
}

/// Fixture implementation that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureEventPublisher;

#[async_trait]
impl EventPublisher for FixtureEventPublisher {
    async fn publish(&self, _event: &CommerceEvent) -> Result<(), EventPublisherError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CouponId, UserId};
    use chrono::Utc;

    #[tokio::test]
    async fn fixture_publisher_accepts_events() {
        let event = CommerceEvent::coupon_issued(CouponId::new(1), UserId::new(1), Utc::now());
        FixtureEventPublisher
            .publish(&event)
            .await
            .expect("fixture publish succeeds");
    }
}
