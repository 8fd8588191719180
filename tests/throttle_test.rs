//! Token bucket behavior.

use std::time::Duration;

use worklane::scheduler::{ThrottleConfig, ThrottleError, Throttler};

fn throttler(rate: usize, interval_ms: u64) -> Throttler {
    Throttler::new(ThrottleConfig {
        rate,
        interval: Duration::from_millis(interval_ms),
    })
}

#[tokio::test]
async fn fourth_allow_fails_until_refill() {
    let throttle = throttler(3, 100);

    assert!(throttle.allow());
    assert!(throttle.allow());
    assert!(throttle.allow());
    assert!(!throttle.allow());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(throttle.allow());
    throttle.stop();
}

#[tokio::test]
async fn refill_never_exceeds_rate() {
    let throttle = throttler(2, 10);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(throttle.available() <= 2);
    throttle.stop();
}

#[tokio::test]
async fn wait_blocks_until_refill() {
    let throttle = throttler(1, 50);
    assert!(throttle.allow());

    let started = tokio::time::Instant::now();
    throttle.wait().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
    throttle.stop();
}

#[tokio::test]
async fn wait_timeout_expires() {
    let throttle = throttler(1, 10_000);
    assert!(throttle.allow());
    assert_eq!(
        throttle.wait_timeout(Duration::from_millis(30)).await,
        Err(ThrottleError::Timeout(Duration::from_millis(30)))
    );
    throttle.stop();
}

#[tokio::test]
async fn stop_releases_waiters() {
    let throttle = std::sync::Arc::new(throttler(1, 10_000));
    assert!(throttle.allow());

    let waiter = {
        let throttle = throttle.clone();
        tokio::spawn(async move { throttle.wait().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    throttle.stop();
    throttle.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter stayed blocked")
        .unwrap();
    assert_eq!(outcome, Err(ThrottleError::Stopped));
    assert!(!throttle.allow());
}
