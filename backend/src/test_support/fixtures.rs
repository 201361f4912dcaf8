//! Seed rows and a fully wired in-memory service graph.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;

use super::timing::{ImmediateSleeper, MutableClock, NoJitter, fixture_now};
use crate::domain::coupon_issuance::CouponIssuancePorts;
use crate::domain::inventory::ReservationStrategy;
use crate::domain::order_state_machine::{OrderCollaborators, OrderPorts};
use crate::domain::ports::{EventPublisher, EventPublisherError, VersionedStore};
use crate::domain::{
    Balance, BalanceLedger, CommerceCommandService, CommerceEvent, Coupon, CouponId,
    CouponIssuanceService, InventoryService, LockManager, LockSettings, Money,
    OptimisticRetryExecutor, Order, OrderId, OrderStateMachine, Product, ProductId, RetryPolicy,
    RetryRuntime, UserId,
};
use crate::outbound::locking::InMemoryLockCoordinator;
use crate::outbound::persistence::{InMemoryCouponStore, InMemoryVersionedStore};

/// Coupon issuable at [`fixture_now`] with a 10% discount.
pub fn active_coupon(id: CouponId, total_quantity: u32) -> Coupon {
    let now = fixture_now();
    Coupon {
        id,
        name: format!("flash {id}"),
        total_quantity,
        issued_count: 0,
        discount_bps: 1_000,
        starts_at: now - TimeDelta::hours(1),
        ends_at: now + TimeDelta::hours(1),
        disabled: false,
    }
}

/// Product row named after its id.
pub fn product(id: ProductId, unit_price: Money, stock: u32) -> Product {
    Product::new(id, format!("item {id}"), unit_price, stock)
}

/// Publisher that keeps every event it receives.
#[derive(Default)]
pub struct RecordingEventPublisher(Mutex<Vec<CommerceEvent>>);

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<CommerceEvent> {
        match self.0.lock() {
            Ok(events) => events.clone(),
            Err(_) => panic!("publisher mutex"),
        }
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(CommerceEvent::kind).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: &CommerceEvent) -> Result<(), EventPublisherError> {
        match self.0.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(_) => panic!("publisher mutex"),
        }
        Ok(())
    }
}

/// Knobs for [`CommerceHarness::with_options`].
#[derive(Debug, Clone, Copy)]
pub struct HarnessOptions {
    pub strategy: ReservationStrategy,
    pub retry: RetryPolicy,
    pub locks: LockSettings,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            strategy: ReservationStrategy::default(),
            // Contention tests hammer one row; sleeps are skipped anyway.
            retry: RetryPolicy {
                max_attempts: 256,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
            },
            locks: LockSettings {
                lease: Duration::from_secs(10),
                wait_timeout: Duration::from_secs(10),
                poll_interval: Duration::from_millis(1),
            },
        }
    }
}

/// Every service wired over in-memory adapters sharing one clock.
pub struct CommerceHarness {
    pub clock: Arc<MutableClock>,
    pub products: Arc<InMemoryVersionedStore<Product>>,
    pub balances: Arc<InMemoryVersionedStore<Balance>>,
    pub orders: Arc<InMemoryVersionedStore<Order>>,
    pub coupons: Arc<InMemoryCouponStore>,
    pub coordinator: Arc<InMemoryLockCoordinator>,
    pub events: Arc<RecordingEventPublisher>,
    pub locks: Arc<LockManager>,
    pub retry: Arc<OptimisticRetryExecutor>,
    pub inventory: Arc<InventoryService>,
    pub coupon_service: Arc<CouponIssuanceService>,
    pub ledger: Arc<BalanceLedger>,
    pub state_machine: Arc<OrderStateMachine>,
}

impl CommerceHarness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_strategy(strategy: ReservationStrategy) -> Self {
        Self::with_options(HarnessOptions {
            strategy,
            ..HarnessOptions::default()
        })
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let clock = Arc::new(MutableClock::default());
        let products = Arc::new(InMemoryVersionedStore::<Product>::new());
        let balances = Arc::new(InMemoryVersionedStore::<Balance>::new());
        let orders = Arc::new(InMemoryVersionedStore::<Order>::new());
        let coupons = Arc::new(InMemoryCouponStore::new());
        let coordinator = Arc::new(InMemoryLockCoordinator::new(clock.clone()));
        let events = Arc::new(RecordingEventPublisher::default());

        let locks = Arc::new(LockManager::new(coordinator.clone(), options.locks));
        let retry = Arc::new(OptimisticRetryExecutor::with_runtime(
            options.retry,
            clock.clone(),
            RetryRuntime {
                sleeper: Arc::new(ImmediateSleeper),
                jitter: Arc::new(NoJitter),
            },
        ));
        let inventory = Arc::new(InventoryService::new(
            products.clone(),
            locks.clone(),
            retry.clone(),
            options.strategy,
            options.locks.wait_timeout,
        ));
        let coupon_service = Arc::new(CouponIssuanceService::new(
            CouponIssuancePorts {
                coupons: coupons.clone(),
                grants: coupons.clone(),
                locks: locks.clone(),
                events: events.clone(),
                clock: clock.clone(),
            },
            options.locks.wait_timeout,
        ));
        let ledger = Arc::new(BalanceLedger::new(
            balances.clone(),
            retry.clone(),
            events.clone(),
            clock.clone(),
        ));
        let state_machine = Arc::new(OrderStateMachine::new(
            OrderPorts {
                orders: orders.clone(),
                products: products.clone(),
                events: events.clone(),
                clock: clock.clone(),
            },
            OrderCollaborators {
                inventory: inventory.clone(),
                coupons: coupon_service.clone(),
                ledger: ledger.clone(),
                locks: locks.clone(),
                retry: retry.clone(),
            },
            options.locks.wait_timeout,
        ));

        Self {
            clock,
            products,
            balances,
            orders,
            coupons,
            coordinator,
            events,
            locks,
            retry,
            inventory,
            coupon_service,
            ledger,
            state_machine,
        }
    }

    /// Command port over this harness.
    pub fn command(&self) -> CommerceCommandService {
        CommerceCommandService::new(
            self.state_machine.clone(),
            self.coupon_service.clone(),
            self.ledger.clone(),
        )
    }

    /// State machine sharing this harness's services over substitute order
    /// and product stores. Inventory is rebuilt over `products`.
    pub fn state_machine_over(
        &self,
        orders: Arc<dyn VersionedStore<Order>>,
        products: Arc<dyn VersionedStore<Product>>,
    ) -> OrderStateMachine {
        let wait = self.locks.settings().wait_timeout;
        let inventory = Arc::new(InventoryService::new(
            products.clone(),
            self.locks.clone(),
            self.retry.clone(),
            self.inventory.strategy(),
            wait,
        ));
        OrderStateMachine::new(
            OrderPorts {
                orders,
                products,
                events: self.events.clone(),
                clock: self.clock.clone(),
            },
            OrderCollaborators {
                inventory,
                coupons: self.coupon_service.clone(),
                ledger: self.ledger.clone(),
                locks: self.locks.clone(),
                retry: self.retry.clone(),
            },
            wait,
        )
    }

    pub fn seed_product(&self, id: ProductId, unit_price: Money, stock: u32) {
        self.products.seed(product(id, unit_price, stock));
    }

    pub fn seed_balance(&self, user_id: UserId, amount: Money) {
        self.balances.seed(Balance::new(user_id, amount));
    }

    /// Seed an active coupon with the given cap and discount.
    pub fn seed_coupon(&self, id: CouponId, total_quantity: u32, discount_bps: u32) {
        self.coupons.seed(Coupon {
            discount_bps,
            ..active_coupon(id, total_quantity)
        });
    }

    pub fn stock_of(&self, id: ProductId) -> u32 {
        match self.products.snapshot(id) {
            Some(row) => row.record.stock_quantity,
            None => panic!("{id} was never seeded"),
        }
    }

    /// Balance of `user_id`; zero when the row does not exist.
    pub fn balance_of(&self, user_id: UserId) -> Money {
        self.balances
            .snapshot(user_id)
            .map_or(Money::ZERO, |row| row.record.amount)
    }

    pub fn issued_count(&self, id: CouponId) -> u32 {
        match self.coupons.snapshot(id) {
            Some(row) => row.record.issued_count,
            None => panic!("{id} was never seeded"),
        }
    }

    pub fn order(&self, id: OrderId) -> Order {
        match self.orders.snapshot(id) {
            Some(row) => row.record,
            None => panic!("{id} was never stored"),
        }
    }
}

impl Default for CommerceHarness {
    fn default() -> Self {
        Self::new()
    }
}
