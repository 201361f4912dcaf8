//! Contention tests: many concurrent flows against one hot row.
//!
//! Each test runs on a multi-thread runtime so flows really interleave.

use std::sync::Arc;

use commerce_backend::domain::ports::VersionedStore;
use commerce_backend::domain::{
    CouponId, Error, ErrorCode, InventoryService, LockManager, LockSettings, Money,
    OptimisticRetryExecutor, Product, ProductId, RequestContext, ReservationStrategy, RetryPolicy,
    UserId,
};
use commerce_backend::outbound::locking::InMemoryLockCoordinator;
use commerce_backend::outbound::persistence::InMemoryVersionedStore;
use commerce_backend::test_support::fixtures::{CommerceHarness, product};
use commerce_backend::test_support::stores::YieldingStore;
use futures::future::join_all;
use mockable::{Clock, DefaultClock};
use rstest::rstest;

const HOT_PRODUCT: ProductId = ProductId::new(1);
const HOT_COUPON: CouponId = CouponId::new(1);

fn count<T>(outcomes: &[Result<T, Error>], code: ErrorCode) -> usize {
    outcomes
        .iter()
        .filter(|outcome| outcome.as_ref().is_err_and(|err| err.code() == code))
        .count()
}

async fn settle<T: Send + 'static>(
    tasks: impl Iterator<Item = tokio::task::JoinHandle<Result<T, Error>>>,
) -> Vec<Result<T, Error>> {
    join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("flow task completes"))
        .collect()
}

#[rstest]
#[case(ReservationStrategy::Optimistic)]
#[case(ReservationStrategy::Lock)]
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn one_hundred_fifty_buyers_share_one_hundred_units(#[case] strategy: ReservationStrategy) {
    let harness = Arc::new(CommerceHarness::with_strategy(strategy));
    harness.seed_product(HOT_PRODUCT, Money::new(1_000), 100);

    let tasks = (0..150).map(|_| {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .inventory
                .reserve(&RequestContext::new(), HOT_PRODUCT, 1)
                .await
        })
    });
    let outcomes = settle(tasks).await;

    let reserved = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(reserved, 100);
    assert_eq!(count(&outcomes, ErrorCode::OutOfStock), 50);
    assert_eq!(harness.stock_of(HOT_PRODUCT), 0);
    assert_eq!(harness.coordinator.active_leases(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn default_configuration_sells_exactly_the_stock_over_a_suspending_store() {
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let rows = Arc::new(InMemoryVersionedStore::<Product>::new());
    rows.seed(product(HOT_PRODUCT, Money::new(1_000), 100));
    let products: Arc<dyn VersionedStore<Product>> = Arc::new(YieldingStore::new(rows.clone()));
    let settings = LockSettings::default();
    let locks = Arc::new(LockManager::new(
        Arc::new(InMemoryLockCoordinator::new(clock.clone())),
        settings,
    ));
    let retry = Arc::new(OptimisticRetryExecutor::new(RetryPolicy::default(), clock));
    let inventory = Arc::new(InventoryService::new(
        products,
        locks,
        retry,
        ReservationStrategy::default(),
        settings.wait_timeout,
    ));

    let tasks = (0..150).map(|_| {
        let inventory = inventory.clone();
        tokio::spawn(async move {
            inventory
                .reserve(&RequestContext::new(), HOT_PRODUCT, 1)
                .await
        })
    });
    let outcomes = settle(tasks).await;

    let reserved = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(reserved, 100);
    assert_eq!(count(&outcomes, ErrorCode::OutOfStock), 50);
    assert_eq!(count(&outcomes, ErrorCode::RetryExhausted), 0);
    assert_eq!(
        rows.snapshot(HOT_PRODUCT).map(|row| row.record.stock_quantity),
        Some(0)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn three_hundred_users_race_for_one_hundred_coupons() {
    let harness = Arc::new(CommerceHarness::new());
    harness.seed_coupon(HOT_COUPON, 100, 1_000);

    let tasks = (1..=300).map(|user| {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .coupon_service
                .issue(&RequestContext::new(), HOT_COUPON, UserId::new(user))
                .await
        })
    });
    let outcomes = settle(tasks).await;

    let issued = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(issued, 100);
    assert_eq!(count(&outcomes, ErrorCode::LimitExceeded), 200);
    assert_eq!(harness.issued_count(HOT_COUPON), 100);
    assert_eq!(harness.coupons.grants_for(HOT_COUPON).len(), 100);
    assert_eq!(
        harness
            .events
            .kinds()
            .iter()
            .filter(|kind| **kind == "coupon_issued")
            .count(),
        100
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn one_user_issuing_ten_times_at_once_gets_one_grant() {
    let harness = Arc::new(CommerceHarness::new());
    harness.seed_coupon(HOT_COUPON, 100, 1_000);
    let user = UserId::new(42);

    let tasks = (0..10).map(|_| {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .coupon_service
                .issue(&RequestContext::new(), HOT_COUPON, user)
                .await
        })
    });
    let outcomes = settle(tasks).await;

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert_eq!(count(&outcomes, ErrorCode::AlreadyIssued), 9);
    assert_eq!(harness.issued_count(HOT_COUPON), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_debits_never_overdraw() {
    let harness = Arc::new(CommerceHarness::new());
    let user = UserId::new(7);
    harness.seed_balance(user, Money::new(50_000));

    let tasks = (0..80).map(|_| {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .ledger
                .debit(&RequestContext::new(), user, Money::new(1_000))
                .await
        })
    });
    let outcomes = settle(tasks).await;

    let applied = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(applied, 50);
    assert_eq!(count(&outcomes, ErrorCode::InsufficientBalance), 30);
    assert_eq!(harness.balance_of(user), Money::ZERO);
}

#[rstest]
#[case(ReservationStrategy::Optimistic)]
#[case(ReservationStrategy::Lock)]
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn reserve_then_release_restores_stock(#[case] strategy: ReservationStrategy) {
    let harness = Arc::new(CommerceHarness::with_strategy(strategy));
    harness.seed_product(HOT_PRODUCT, Money::new(1_000), 40);

    let tasks = (0..40).map(|_| {
        let harness = harness.clone();
        tokio::spawn(async move {
            let ctx = RequestContext::new();
            let mut reservation = harness.inventory.reserve(&ctx, HOT_PRODUCT, 1).await?;
            harness.inventory.release(&ctx, &mut reservation).await
        })
    });
    let outcomes = settle(tasks).await;

    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(harness.stock_of(HOT_PRODUCT), 40);
}
