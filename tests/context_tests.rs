//! Tests for cancellation and deadline propagation.

use std::time::Duration;
use tinkrun::{Action, Context, Error};

// =============================================================================
// Deadline Tests
// =============================================================================

#[tokio::test]
async fn test_background_never_done() {
    let ctx = Context::background();
    let raced = tokio::time::timeout(Duration::from_millis(50), ctx.done()).await;
    assert!(raced.is_err(), "background context should stay live");
    assert!(ctx.err().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_at_deadline() {
    let ctx = Context::background().with_timeout(Duration::from_secs(600));
    let start = tokio::time::Instant::now();

    let err = ctx.done().await;

    assert!(matches!(err, Error::DeadlineExceeded));
    assert!(start.elapsed() >= Duration::from_secs(600));
}

#[tokio::test(start_paused = true)]
async fn test_shorter_parent_deadline_wins() {
    let parent = Context::background().with_timeout(Duration::from_secs(5));
    let child = parent.with_timeout(Duration::from_secs(60));
    let start = tokio::time::Instant::now();

    child.done().await;

    assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_largest_action_timeout_runs_unbounded() {
    let action: Action = serde_json::from_str(
        r#"{"name":"stream","image":"alpine","timeout":18446744073709551615}"#,
    )
    .unwrap();

    let ctx = Context::background().with_timeout(action.timeout().unwrap());

    assert!(ctx.deadline().is_none());
    let raced = tokio::time::timeout(Duration::from_secs(3600), ctx.done()).await;
    assert!(raced.is_err(), "context should stay live");
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[tokio::test]
async fn test_cancel_wakes_waiter() {
    let ctx = Context::background().with_timeout(Duration::from_secs(3600));
    let waiter = ctx.clone();
    let handle = tokio::spawn(async move { waiter.done().await });

    ctx.cancel();

    let err = handle.await.unwrap();
    assert!(matches!(err, Error::Canceled));
    assert!(matches!(ctx.err(), Some(Error::Canceled)));
}

#[tokio::test]
async fn test_sibling_contexts_independent() {
    let root = Context::background();
    let logs = root.with_cancel();
    let wait = root.with_timeout(Duration::from_secs(60));

    logs.cancel();

    assert!(logs.err().is_some());
    assert!(wait.err().is_none());
    assert!(root.err().is_none());
}
