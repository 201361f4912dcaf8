//! Unit tests for the optimistic retry executor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rstest::{fixture, rstest};

use super::{AttemptError, OptimisticRetryExecutor, RetryPolicy, RetryRuntime};
use crate::domain::ports::StoreError;
use crate::domain::{Error, ErrorCode, RequestContext};
use crate::test_support::timing::{MutableClock, NoJitter, RecordingSleeper};

struct Harness {
    executor: OptimisticRetryExecutor,
    sleeper: Arc<RecordingSleeper>,
}

fn harness(policy: RetryPolicy) -> Harness {
    let sleeper = Arc::new(RecordingSleeper::default());
    let executor = OptimisticRetryExecutor::with_runtime(
        policy,
        Arc::new(MutableClock::default()),
        RetryRuntime {
            sleeper: sleeper.clone(),
            jitter: Arc::new(NoJitter),
        },
    );
    Harness { executor, sleeper }
}

#[fixture]
fn default_harness() -> Harness {
    harness(RetryPolicy::default())
}

fn conflict() -> AttemptError {
    AttemptError::Conflict(StoreError::version_conflict(1_u64, 2_u64))
}

#[rstest]
#[case(1, 100)]
#[case(2, 200)]
#[case(3, 400)]
#[case(4, 800)]
#[case(5, 1_000)]
#[case(12, 1_000)]
fn base_delay_doubles_up_to_the_cap(#[case] attempt: u32, #[case] expected_ms: u64) {
    let policy = RetryPolicy::default();
    assert_eq!(policy.base_delay(attempt), Duration::from_millis(expected_ms));
}

#[rstest]
#[tokio::test]
async fn first_success_does_not_sleep(default_harness: Harness) {
    let value = default_harness
        .executor
        .run(&RequestContext::new(), "noop", |_| async { Ok::<_, AttemptError>(7) })
        .await
        .expect("first attempt succeeds");

    assert_eq!(value, 7);
    assert!(default_harness.sleeper.recorded().is_empty());
}

#[rstest]
#[tokio::test]
async fn conflicts_are_retried_with_backoff(default_harness: Harness) {
    let calls = AtomicU32::new(0);
    let value = default_harness
        .executor
        .run(&RequestContext::new(), "bump", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(conflict())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .expect("third attempt succeeds");

    assert_eq!(value, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        default_harness.sleeper.recorded(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[rstest]
#[tokio::test]
async fn exhaustion_reports_last_conflict(default_harness: Harness) {
    let err = default_harness
        .executor
        .run(&RequestContext::new(), "bump", |_| async {
            Err::<(), _>(conflict())
        })
        .await
        .expect_err("always conflicting");

    assert_eq!(err.code(), ErrorCode::RetryExhausted);
    assert!(err.is_retryable());
    let details = err.details().expect("details attached");
    assert_eq!(details["attempts"], 3);
    assert_eq!(details["operation"], "bump");
    assert!(
        details["lastConflict"]
            .as_str()
            .is_some_and(|cause| cause.contains("expected 1"))
    );
    assert_eq!(default_harness.sleeper.recorded().len(), 2);
}

#[rstest]
#[tokio::test]
async fn fatal_errors_pass_through_immediately(default_harness: Harness) {
    let calls = AtomicU32::new(0);
    let err = default_harness
        .executor
        .run(&RequestContext::new(), "reserve", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AttemptError::Fatal(Error::out_of_stock("none left"))) }
        })
        .await
        .expect_err("fatal");

    assert_eq!(err.code(), ErrorCode::OutOfStock);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(default_harness.sleeper.recorded().is_empty());
}

#[rstest]
#[tokio::test]
async fn non_conflict_store_errors_are_fatal(default_harness: Harness) {
    let err = default_harness
        .executor
        .run(&RequestContext::new(), "read", |_| async {
            Err::<(), AttemptError>(StoreError::connection("refused").into())
        })
        .await
        .expect_err("connection failure");

    assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
}

#[rstest]
#[tokio::test]
async fn zero_attempts_still_runs_once() {
    let harness = harness(RetryPolicy {
        max_attempts: 0,
        ..RetryPolicy::default()
    });
    let value = harness
        .executor
        .run(&RequestContext::new(), "once", |attempt| async move {
            Ok::<_, AttemptError>(attempt)
        })
        .await
        .expect("single attempt");
    assert_eq!(value, 1);
}

#[rstest]
#[tokio::test]
async fn deadline_stops_retrying_early() {
    let harness = harness(RetryPolicy {
        max_attempts: 10,
        initial_backoff: Duration::from_secs(5),
        max_backoff: Duration::from_secs(5),
    });
    let ctx = RequestContext::with_timeout(Duration::from_secs(1));

    let err = harness
        .executor
        .run(&ctx, "bump", |_| async { Err::<(), _>(conflict()) })
        .await
        .expect_err("deadline cuts retries");

    assert_eq!(err.code(), ErrorCode::RetryExhausted);
    assert_eq!(err.details().expect("details")["attempts"], 1);
    assert!(harness.sleeper.recorded().is_empty());
}
