//! Lifecycle integration: a peer whose command cannot be spawned runs
//! through the reconnect supervisor and settles in the error state with
//! the full attempt count recorded.

use manifold_core::{PeerConfig, TransportKind};
use manifold_registry::{Lifecycle, Registry, RegistryError};
use std::sync::Arc;
use std::time::Duration;

fn bad_config(max_retries: i32) -> PeerConfig {
    PeerConfig {
        name: "bad".into(),
        transport: TransportKind::Stdio,
        command: "/does/not/exist/manifold-test-binary".into(),
        max_reconnect_attempts: max_retries,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn supervisor_exhausts_budget_and_settles_in_error() {
    let registry = Arc::new(Registry::new());

    let err = registry.connect(bad_config(3)).await.unwrap_err();
    assert!(matches!(err, RegistryError::Connect { .. }));

    // Backoff schedule for three attempts is 1s + 2s + 4s; the paused
    // clock advances through it as the supervisor sleeps.
    let mut settled = false;
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = registry.status_of("bad").await.unwrap();
        if status.lifecycle == Lifecycle::Error && status.reconnect_attempts == 3 {
            settled = true;
            break;
        }
    }
    assert!(settled, "supervisor did not settle in error with 3 attempts");

    // And it stays settled: no further supervisor is running.
    tokio::time::sleep(Duration::from_secs(120)).await;
    let status = registry.status_of("bad").await.unwrap();
    assert_eq!(status.lifecycle, Lifecycle::Error);
    assert_eq!(status.reconnect_attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_passes_through_reconnecting() {
    let registry = Arc::new(Registry::new());
    let _ = registry.connect(bad_config(2)).await;

    // Immediately after the failed connect the supervisor flips the peer
    // to reconnecting.
    tokio::task::yield_now().await;
    let status = registry.status_of("bad").await.unwrap();
    assert!(
        matches!(status.lifecycle, Lifecycle::Reconnecting | Lifecycle::Error),
        "unexpected lifecycle {:?}",
        status.lifecycle
    );
}

#[tokio::test]
async fn disabled_budget_never_supervises() {
    let registry = Arc::new(Registry::new());
    let _ = registry.connect(bad_config(-1)).await;
    let status = registry.status_of("bad").await.unwrap();
    assert_eq!(status.lifecycle, Lifecycle::Error);
    assert_eq!(status.reconnect_attempts, 0);
}
