//! Per-request execution context.

use std::time::Duration;

use tokio::time::Instant;

use super::FlowId;

/// Identity and deadline of one logical request.
///
/// The flow id is the lock owner identity; re-acquiring a lease under the same
/// context is reentrant. The optional deadline clamps lock waits and retry
/// budgets.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use commerce_backend::domain::RequestContext;
///
/// # tokio::runtime::Runtime::new().expect("runtime").block_on(async {
/// let ctx = RequestContext::with_timeout(Duration::from_secs(2));
/// assert!(!ctx.is_expired());
/// assert!(ctx.remaining().is_some());
/// # });
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    flow: FlowId,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Fresh flow without a deadline.
    pub fn new() -> Self {
        Self {
            flow: FlowId::random(),
            deadline: None,
        }
    }

    /// Fresh flow that must finish within `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flow: FlowId::random(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Same flow with the deadline dropped, for compensation that must run
    /// to completion.
    pub fn detached(&self) -> Self {
        Self {
            flow: self.flow,
            deadline: None,
        }
    }

    /// Lock owner identity for this flow.
    pub fn flow(&self) -> FlowId {
        self.flow
    }

    /// Absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// `budget` shortened to what the deadline still allows.
    pub fn clamp(&self, budget: Duration) -> Duration {
        self.remaining()
            .map_or(budget, |remaining| remaining.min(budget))
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
