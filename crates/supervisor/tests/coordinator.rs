mod common;

use common::{fast_timings, free_port, launch_spec, probe, FakeServer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use supervisor::{AbortReason, RestartCoordinator, RestartOutcome, RestartState};

fn coordinator(fake: &Arc<FakeServer>, port: u16, port_wait_ms: u64) -> Arc<RestartCoordinator> {
    Arc::new(RestartCoordinator::new(
        fake.clone(),
        launch_spec(),
        port,
        probe(),
        &fast_timings(port_wait_ms),
    ))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_replaces_running_instance() {
    let port = free_port();
    let fake = Arc::new(FakeServer::new(port));
    let coordinator = coordinator(&fake, port, 1000);

    let first = coordinator.start_initial().await;
    let RestartOutcome::Started { pid: first_pid } = first else {
        panic!("initial start failed: {:?}", first);
    };
    assert_eq!(coordinator.current_pid(), Some(first_pid));

    let second = coordinator.restart().await;
    let RestartOutcome::Started { pid: second_pid } = second else {
        panic!("restart failed: {:?}", second);
    };

    assert_ne!(first_pid, second_pid);
    assert_eq!(coordinator.current_pid(), Some(second_pid));
    assert_eq!(fake.live(), 1);
    assert_eq!(coordinator.state(), RestartState::Idle);
    assert_eq!(coordinator.stats().completed(), 2);
    assert_eq!(coordinator.stats().escalated(), 0);
    // The new instance holds the port
    assert!(!probe().is_available(port));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_restarts_never_overlap() {
    let port = free_port();
    let fake = Arc::new(FakeServer::new(port).with_stop_delay(Duration::from_millis(150)));
    let coordinator = coordinator(&fake, port, 2000);
    coordinator.start_initial().await;

    let a = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.restart().await }
    });
    let b = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.restart().await }
    });

    assert!(matches!(a.await.unwrap(), RestartOutcome::Started { .. }));
    assert!(matches!(b.await.unwrap(), RestartOutcome::Started { .. }));

    assert_eq!(fake.spawns(), 3);
    assert_eq!(fake.max_live(), 1);

    // Every start after the first follows the stop of its predecessor
    let log = fake.log();
    assert_eq!(log.len(), 5, "{:?}", log);
    for pair in log.chunks(2).filter(|pair| pair.len() == 2) {
        let spawned = pair[0].strip_prefix("spawn ").unwrap();
        let stopped = pair[1].strip_prefix("stop ").unwrap();
        assert_eq!(spawned, stopped, "{:?}", log);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stuck_port_aborts_without_spawning() {
    let port = free_port();
    let fake = Arc::new(FakeServer::new(port));
    fake.occupy(false);
    let coordinator = coordinator(&fake, port, 500);

    let start = Instant::now();
    let outcome = coordinator.restart().await;
    let elapsed = start.elapsed();

    assert_eq!(
        outcome,
        RestartOutcome::Aborted {
            reason: AbortReason::PortStillBound
        }
    );
    assert!(elapsed >= Duration::from_millis(900), "gave up early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "took too long: {:?}", elapsed);
    assert_eq!(fake.spawns(), 0);
    assert_eq!(coordinator.current_pid(), None);
    assert_eq!(coordinator.state(), RestartState::Idle);
    assert_eq!(coordinator.stats().aborted(), 1);
    assert_eq!(coordinator.stats().escalated(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_escalation_frees_foreign_listener() {
    let port = free_port();
    let fake = Arc::new(FakeServer::new(port));
    fake.occupy(true);
    let coordinator = coordinator(&fake, port, 300);

    let outcome = coordinator.restart().await;

    assert!(matches!(outcome, RestartOutcome::Started { .. }), "{:?}", outcome);
    assert_eq!(coordinator.stats().escalated(), 1);
    assert_eq!(fake.spawns(), 1);
    assert!(!probe().is_available(port));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_port_freed_during_wait_needs_no_escalation() {
    let port = free_port();
    let fake = Arc::new(FakeServer::new(port));
    fake.occupy(false);
    let coordinator = coordinator(&fake, port, 2000);

    let releaser = {
        let fake = fake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            fake.release_occupant();
        })
    };

    let outcome = coordinator.restart().await;
    releaser.await.unwrap();

    assert!(matches!(outcome, RestartOutcome::Started { .. }));
    assert_eq!(coordinator.stats().escalated(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spawn_failure_leaves_server_stopped() {
    let port = free_port();
    let fake = Arc::new(FakeServer::new(port));
    let coordinator = coordinator(&fake, port, 500);
    coordinator.start_initial().await;

    fake.set_fail_spawns(true);
    let outcome = coordinator.restart().await;
    assert_eq!(
        outcome,
        RestartOutcome::Aborted {
            reason: AbortReason::SpawnFailed
        }
    );
    assert_eq!(coordinator.current_pid(), None);
    assert_eq!(fake.live(), 0);

    // The next change retries from a clean slate
    fake.set_fail_spawns(false);
    assert!(matches!(
        coordinator.restart().await,
        RestartOutcome::Started { .. }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_stops_server_and_skips_later_restarts() {
    let port = free_port();
    let fake = Arc::new(FakeServer::new(port));
    let coordinator = coordinator(&fake, port, 500);
    coordinator.start_initial().await;
    assert_eq!(fake.live(), 1);

    coordinator.shutdown().await;
    assert_eq!(fake.live(), 0);
    assert_eq!(coordinator.current_pid(), None);
    assert!(probe().is_available(port));

    assert_eq!(coordinator.restart().await, RestartOutcome::Skipped);
    assert_eq!(coordinator.start_initial().await, RestartOutcome::Skipped);
    assert_eq!(fake.spawns(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_state_transitions_are_published() {
    let port = free_port();
    let fake = Arc::new(FakeServer::new(port).with_stop_delay(Duration::from_millis(200)));
    let coordinator = coordinator(&fake, port, 500);
    coordinator.start_initial().await;

    let mut states = coordinator.subscribe();
    let restart = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.restart().await }
    });

    // Stopping lasts long enough to be observed
    states
        .wait_for(|state| *state == RestartState::Stopping)
        .await
        .unwrap();

    restart.await.unwrap();
    assert_eq!(*states.borrow_and_update(), RestartState::Idle);
}
