//! Composed abort-signal behavior, including the env-backed durations.
//!
//! Environment mutation lives in this binary only, so it cannot race the
//! other suites.

use std::time::Duration;

use modelgate::{AbortKind, AbortSignal, CancelHandle, TimeoutConfig};

#[tokio::test]
async fn prefired_cancellation_wins_over_a_short_timer() {
    let cancel = CancelHandle::new();
    cancel.cancel();

    let signal = AbortSignal::new(Duration::from_millis(100), Some(cancel));
    // Already aborted, and classified as cancellation, not timeout.
    assert_eq!(signal.aborted(), Some(AbortKind::Cancelled));
    assert_eq!(signal.fired().await, AbortKind::Cancelled);
}

#[tokio::test]
async fn timer_abort_classifies_as_timeout() {
    let signal = AbortSignal::new(Duration::from_millis(10), Some(CancelHandle::new()));
    assert_eq!(signal.fired().await, AbortKind::Timeout);
}

#[tokio::test]
async fn late_cancellation_still_interrupts_the_timer() {
    let cancel = CancelHandle::new();
    let signal = AbortSignal::new(Duration::from_secs(30), Some(cancel.clone()));
    let waiter = tokio::spawn(async move { signal.fired().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    assert_eq!(waiter.await.unwrap(), AbortKind::Cancelled);
}

#[test]
fn env_overrides_are_read_at_call_time() {
    std::env::set_var("GATEWAY_TIMEOUT_MS", "50000");
    std::env::set_var("AI_STREAMING_TIMEOUT_MS", "10000");
    std::env::set_var("AI_TIMEOUT_MS", "20000");
    let config = TimeoutConfig::from_env();
    assert_eq!(config.gateway, Duration::from_millis(50_000));
    assert_eq!(config.streaming, Duration::from_millis(10_000));
    assert_eq!(config.plain, Duration::from_millis(20_000));

    // A later change is observed by the next call; nothing is cached.
    std::env::set_var("AI_TIMEOUT_MS", "30000");
    assert_eq!(TimeoutConfig::from_env().plain, Duration::from_millis(30_000));

    // A streaming override at or above the gateway timeout is clamped
    // back below it.
    std::env::set_var("AI_STREAMING_TIMEOUT_MS", "50000");
    let config = TimeoutConfig::from_env();
    assert!(config.streaming < config.gateway);

    std::env::remove_var("GATEWAY_TIMEOUT_MS");
    std::env::remove_var("AI_STREAMING_TIMEOUT_MS");
    std::env::remove_var("AI_TIMEOUT_MS");
}
