//! Unit tests for the lock manager's wait, release, and scoping rules.

use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::{LockHandle, LockManager, LockSettings, ResourceKey};
use crate::domain::ports::{LeaseToken, LockCoordinatorError, MockLockCoordinator};
use crate::domain::{CouponId, Error, ErrorCode, ProductId, RequestContext};
use crate::outbound::locking::InMemoryLockCoordinator;
use crate::test_support::timing::MutableClock;

#[fixture]
fn fast_settings() -> LockSettings {
    LockSettings {
        lease: Duration::from_secs(10),
        wait_timeout: Duration::from_millis(40),
        poll_interval: Duration::from_millis(5),
    }
}

fn manager(coordinator: MockLockCoordinator, settings: LockSettings) -> LockManager {
    LockManager::new(Arc::new(coordinator), settings)
}

fn product_key() -> ResourceKey {
    ResourceKey::product(ProductId::new(1))
}

#[rstest]
#[tokio::test]
async fn acquire_returns_handle_when_granted(fast_settings: LockSettings) {
    let token = LeaseToken::random();
    let mut coordinator = MockLockCoordinator::new();
    coordinator
        .expect_try_acquire()
        .times(1)
        .return_once(move |_, _, _| Ok(Some(token)));

    let manager = manager(coordinator, fast_settings);
    let handle = manager
        .acquire(
            &RequestContext::new(),
            product_key(),
            fast_settings.lease,
            fast_settings.wait_timeout,
        )
        .await
        .expect("lease granted");

    assert_eq!(handle.token(), token);
    assert_eq!(handle.key(), &product_key());
    assert!(!handle.is_released());
}

#[rstest]
#[tokio::test]
async fn acquire_polls_until_granted(fast_settings: LockSettings) {
    let mut coordinator = MockLockCoordinator::new();
    let mut remaining_denials = 2;
    coordinator
        .expect_try_acquire()
        .times(3)
        .returning(move |_, _, _| {
            if remaining_denials > 0 {
                remaining_denials -= 1;
                Ok(None)
            } else {
                Ok(Some(LeaseToken::random()))
            }
        });

    let manager = manager(coordinator, fast_settings);
    manager
        .acquire(
            &RequestContext::new(),
            product_key(),
            fast_settings.lease,
            Duration::from_secs(1),
        )
        .await
        .expect("granted on third poll");
}

#[rstest]
#[tokio::test]
async fn acquire_times_out_when_held_elsewhere(fast_settings: LockSettings) {
    let mut coordinator = MockLockCoordinator::new();
    coordinator
        .expect_try_acquire()
        .returning(|_, _, _| Ok(None));

    let manager = manager(coordinator, fast_settings);
    let err = manager
        .acquire(
            &RequestContext::new(),
            product_key(),
            fast_settings.lease,
            fast_settings.wait_timeout,
        )
        .await
        .expect_err("always held");

    assert_eq!(err.code(), ErrorCode::LockTimeout);
    assert_eq!(
        err.details().expect("details")["resource"],
        serde_json::json!("product:1")
    );
}

#[rstest]
#[tokio::test]
async fn deadline_clamps_the_wait(fast_settings: LockSettings) {
    let mut coordinator = MockLockCoordinator::new();
    coordinator
        .expect_try_acquire()
        .returning(|_, _, _| Ok(None));

    let manager = manager(coordinator, fast_settings);
    let ctx = RequestContext::with_timeout(Duration::from_millis(20));
    let started = std::time::Instant::now();
    let err = manager
        .acquire(&ctx, product_key(), fast_settings.lease, Duration::from_secs(30))
        .await
        .expect_err("deadline wins");

    assert_eq!(err.code(), ErrorCode::LockTimeout);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[rstest]
#[tokio::test]
async fn coordinator_outage_is_service_unavailable(fast_settings: LockSettings) {
    let mut coordinator = MockLockCoordinator::new();
    coordinator
        .expect_try_acquire()
        .times(1)
        .return_once(|_, _, _| Err(LockCoordinatorError::connection("refused")));

    let manager = manager(coordinator, fast_settings);
    let err = manager
        .acquire(
            &RequestContext::new(),
            product_key(),
            fast_settings.lease,
            fast_settings.wait_timeout,
        )
        .await
        .expect_err("outage");

    assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
}

#[rstest]
#[tokio::test]
async fn release_is_idempotent(fast_settings: LockSettings) {
    let mut coordinator = MockLockCoordinator::new();
    coordinator
        .expect_try_acquire()
        .return_once(|_, _, _| Ok(Some(LeaseToken::random())));
    coordinator
        .expect_release()
        .times(1)
        .return_once(|_, _, _| Ok(true));

    let manager = manager(coordinator, fast_settings);
    let handle = manager
        .acquire(
            &RequestContext::new(),
            product_key(),
            fast_settings.lease,
            fast_settings.wait_timeout,
        )
        .await
        .expect("granted");

    manager.release(&handle).await;
    manager.release(&handle).await;
    assert!(handle.is_released());
}

#[rstest]
#[tokio::test]
async fn release_swallows_coordinator_failures(fast_settings: LockSettings) {
    let mut coordinator = MockLockCoordinator::new();
    coordinator
        .expect_try_acquire()
        .return_once(|_, _, _| Ok(Some(LeaseToken::random())));
    coordinator
        .expect_release()
        .times(1)
        .return_once(|_, _, _| Err(LockCoordinatorError::connection("gone")));

    let manager = manager(coordinator, fast_settings);
    let handle = manager
        .acquire(
            &RequestContext::new(),
            product_key(),
            fast_settings.lease,
            fast_settings.wait_timeout,
        )
        .await
        .expect("granted");
    manager.release(&handle).await;
}

#[rstest]
#[tokio::test]
async fn with_lock_releases_when_the_operation_fails(fast_settings: LockSettings) {
    let mut coordinator = MockLockCoordinator::new();
    coordinator
        .expect_try_acquire()
        .return_once(|_, _, _| Ok(Some(LeaseToken::random())));
    coordinator
        .expect_release()
        .times(1)
        .return_once(|_, _, _| Ok(true));

    let manager = manager(coordinator, fast_settings);
    let err = manager
        .with_lock(
            &RequestContext::new(),
            product_key(),
            fast_settings.wait_timeout,
            || async { Err::<(), _>(Error::out_of_stock("sold out")) },
        )
        .await
        .expect_err("operation fails");

    assert_eq!(err.code(), ErrorCode::OutOfStock);
}

#[rstest]
#[tokio::test]
async fn acquire_all_takes_keys_in_order_and_unwinds_on_failure(fast_settings: LockSettings) {
    let mut coordinator = MockLockCoordinator::new();
    let mut seen = Vec::new();
    coordinator
        .expect_try_acquire()
        .returning(move |key, _, _| {
            seen.push(key.as_str().to_owned());
            match key.as_str() {
                "coupon:1" | "product:1" => Ok(Some(LeaseToken::random())),
                other => {
                    assert_eq!(seen, ["coupon:1", "product:1", other]);
                    Ok(None)
                }
            }
        });
    coordinator
        .expect_release()
        .times(2)
        .returning(|_, _, _| Ok(true));

    let manager = manager(coordinator, fast_settings);
    let err = manager
        .acquire_all(
            &RequestContext::new(),
            [
                ResourceKey::product(ProductId::new(2)),
                ResourceKey::product(ProductId::new(1)),
                ResourceKey::coupon(CouponId::new(1)),
            ],
            Duration::ZERO,
        )
        .await
        .expect_err("third key is held");

    assert_eq!(err.code(), ErrorCode::LockTimeout);
}

#[rstest]
#[tokio::test]
async fn nested_acquire_by_one_flow_reenters(fast_settings: LockSettings) {
    let clock = Arc::new(MutableClock::default());
    let manager = LockManager::new(Arc::new(InMemoryLockCoordinator::new(clock)), fast_settings);
    let flow = RequestContext::new();
    let other = RequestContext::new();

    let outer = take(&manager, &flow).await.expect("outer lease");
    let inner = take(&manager, &flow).await.expect("same flow re-enters");
    manager.release(&inner).await;

    let err = take(&manager, &other)
        .await
        .expect_err("outer hold still owns the key");
    assert_eq!(err.code(), ErrorCode::LockTimeout);
    let again = take(&manager, &flow).await.expect("owner may re-enter again");
    manager.release(&again).await;

    manager.release(&outer).await;
    let handed_over = take(&manager, &other)
        .await
        .expect("free after outer release");
    manager.release(&handed_over).await;
}

async fn take(manager: &LockManager, ctx: &RequestContext) -> Result<LockHandle, Error> {
    let settings = *manager.settings();
    manager
        .acquire(ctx, product_key(), settings.lease, settings.wait_timeout)
        .await
}
