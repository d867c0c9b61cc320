use evo_relay::supervisor::lock::InstanceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn parked_instance_takes_over_after_release() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("relay.lock");

    let first = InstanceLock::try_acquire(&path)
        .expect("lock file usable")
        .expect("first acquire");

    let cancel = CancellationToken::new();
    let waiter_path = path.clone();
    let waiter_cancel = cancel.clone();
    let waiter = tokio::spawn(async move {
        InstanceLock::acquire(&waiter_path, Duration::from_millis(10), &waiter_cancel).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished(), "second instance must stay parked");

    first.release();
    let second = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter finished")
        .expect("waiter task")
        .expect("lock file usable");
    assert!(second.is_some());
}
