//! Factory failures roll back their reservation; invalid releases are
//! rejected without touching pool state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use queuepool::testing::MockFactory;
use queuepool::{Error, EventKind, Pool, PoolConfig, ResourceId};

#[tokio::test]
async fn failed_creation_rolls_back_reservation() {
    let factory = MockFactory::new("db");
    let tracker = factory.tracker();
    let pool = Pool::new(factory, PoolConfig::new(1, 0)).unwrap();

    tracker.fail_next(1);
    let err = pool.acquire().await.unwrap_err();
    assert!(
        matches!(err, Error::ResourceCreation { ref resource_id, .. } if resource_id == "db"),
        "got: {err:?}"
    );
    assert!(!err.is_retryable());

    let stats = pool.stats();
    assert_eq!(stats.creating, 0);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.created, 0);

    // Capacity was not consumed by the failure.
    let lease = pool.acquire_timeout(Some(Duration::ZERO)).await.unwrap();
    assert_eq!(lease.id().seq(), 0);
}

#[tokio::test(start_paused = true)]
async fn waiter_inherits_slot_freed_by_failed_creation() {
    let factory = MockFactory::new("db").with_delay(Duration::from_millis(50));
    let tracker = factory.tracker();
    let pool = Pool::new(factory, PoolConfig::new(1, 0)).unwrap();
    tracker.fail_next(1);

    let first = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().waiters, 1, "slot is reserved by the first caller");

    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::ResourceCreation { .. }));

    let lease = second.await.unwrap().expect("second caller creates in the freed slot");
    assert_eq!(lease.serial, 0);
    assert_eq!(tracker.failed(), 1);
    assert_eq!(pool.stats().leased, 1);
}

#[tokio::test]
async fn release_to_wrong_pool_is_invalid_and_changes_nothing() {
    let home = Pool::new(MockFactory::new("db"), PoolConfig::new(2, 0)).unwrap();
    let other = Pool::new(MockFactory::new("db"), PoolConfig::new(2, 0)).unwrap();

    let _other_lease = other.acquire().await.unwrap();
    let lease = home.acquire().await.unwrap();

    let err = other.release(lease).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRelease { .. }), "got: {err:?}");

    let other_stats = other.stats();
    assert_eq!(other_stats.leased, 1, "leased count unchanged");
    assert_eq!(other_stats.checkins, 0);

    // The rejected lease went back to the pool that granted it.
    let home_stats = home.stats();
    assert_eq!(home_stats.leased, 0);
    assert_eq!(home_stats.idle, 1);
}

#[tokio::test]
async fn release_through_owning_pool_succeeds() {
    let pool = Pool::new(MockFactory::new("db"), PoolConfig::new(1, 0)).unwrap();
    let lease = pool.acquire().await.unwrap();

    pool.release(lease).await.unwrap();

    assert_eq!(pool.stats().idle, 1);
    assert_eq!(pool.stats().checkins, 1);
}

#[tokio::test]
async fn failed_teardown_is_logged_not_propagated() {
    let factory = MockFactory::new("db");
    let tracker = factory.tracker();
    let pool = Pool::new(factory, PoolConfig::new(1, 1)).unwrap();
    let destroyed: Arc<Mutex<Vec<ResourceId>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let destroyed = Arc::clone(&destroyed);
        pool.on_event(EventKind::Destroy, move |event| {
            destroyed.lock().push(event.resource_id);
            Ok(())
        });
    }

    let kept = pool.acquire().await.unwrap();
    let extra = pool.acquire().await.unwrap();
    let (kept_id, extra_id) = (kept.id(), extra.id());
    tracker.fail_destroy_next(2);

    kept.release().await.unwrap();
    extra
        .release()
        .await
        .expect("shed teardown failure stays inside the pool");
    pool.shutdown().await;

    assert_eq!(tracker.destroyed(), vec![1, 0]);
    assert_eq!(*destroyed.lock(), vec![extra_id, kept_id]);

    let stats = pool.stats();
    assert_eq!(stats.destroyed, 2);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.leased, 0);
}
