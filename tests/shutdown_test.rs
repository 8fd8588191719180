//! Lifecycle coordination shared by pools and the manager.

use std::sync::Arc;
use std::time::Duration;

use worklane::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};

#[test]
fn initial_state_is_running() {
    let coordinator = ShutdownCoordinator::new();
    assert_eq!(coordinator.state(), ShutdownState::Running);
    assert!(coordinator.is_accepting());
}

#[test]
fn guards_track_in_flight_work() {
    let coordinator = ShutdownCoordinator::new();
    let g1 = coordinator.track();
    let g2 = coordinator.track();
    assert_eq!(coordinator.in_flight_count(), 2);
    drop(g1);
    assert_eq!(coordinator.in_flight_count(), 1);
    drop(g2);
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[test]
fn begin_only_succeeds_once() {
    let coordinator = ShutdownCoordinator::new();
    assert!(coordinator.begin());
    assert!(!coordinator.begin());
    assert_eq!(coordinator.state(), ShutdownState::Draining);
    assert!(coordinator.is_cancelled());
    assert!(coordinator.track().is_none());
}

#[test]
fn parent_cancellation_stops_admission() {
    let parent = tokio_util::sync::CancellationToken::new();
    let coordinator = ShutdownCoordinator::with_parent(&parent);
    parent.cancel();
    assert!(!coordinator.is_accepting());
    assert_eq!(coordinator.state(), ShutdownState::Running);
}

#[tokio::test]
async fn drain_waits_for_guards() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let guard = coordinator.track().unwrap();

    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(guard);
    });

    let result = coordinator.initiate(Duration::from_secs(1)).await;
    assert_eq!(result, ShutdownResult::Complete);
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
    releaser.await.unwrap();
}

#[tokio::test]
async fn drain_times_out_with_remaining_count() {
    let coordinator = ShutdownCoordinator::new();
    let _g1 = coordinator.track().unwrap();
    let _g2 = coordinator.track().unwrap();

    let result = coordinator.initiate(Duration::from_millis(30)).await;
    assert_eq!(result, ShutdownResult::Timeout { remaining: 2 });
}

#[tokio::test]
async fn wait_stopped_releases_on_finish() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    coordinator.begin();

    let waiter = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.wait_stopped().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    coordinator.finish();

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter not released")
        .unwrap();
}

#[test]
fn merge_sums_remaining() {
    assert_eq!(
        ShutdownResult::Complete.merge(ShutdownResult::Complete),
        ShutdownResult::Complete
    );
    assert_eq!(
        ShutdownResult::Timeout { remaining: 1 }.merge(ShutdownResult::Complete),
        ShutdownResult::Timeout { remaining: 1 }
    );
    assert_eq!(
        ShutdownResult::Timeout { remaining: 2 }.merge(ShutdownResult::Timeout { remaining: 3 }),
        ShutdownResult::Timeout { remaining: 5 }
    );
}
