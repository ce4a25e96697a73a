//! Cancelling or timing out an acquire never leaks a waiter entry, a
//! creation slot, or a resource.

use std::time::Duration;

use queuepool::testing::MockFactory;
use queuepool::{Error, Pool, PoolConfig};

#[tokio::test(start_paused = true)]
async fn dropped_waiting_acquire_leaves_the_queue() {
    let pool = Pool::new(MockFactory::new("db"), PoolConfig::new(1, 0)).unwrap();
    let held = pool.acquire().await.unwrap();

    let cancelled =
        tokio::time::timeout(Duration::from_millis(10), pool.acquire_timeout(None)).await;
    assert!(cancelled.is_err(), "outer timeout cancels the acquire");
    assert_eq!(pool.stats().waiters, 0);

    drop(held);
    let stats = pool.stats();
    assert_eq!(stats.idle, 1, "release was not handed to the cancelled caller");
    assert_eq!(stats.leased, 0);

    let lease = pool.acquire_timeout(Some(Duration::ZERO)).await.unwrap();
    assert_eq!(lease.id().seq(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_creating_acquire_rolls_back_its_slot() {
    let factory = MockFactory::new("db").with_delay(Duration::from_millis(100));
    let tracker = factory.tracker();
    let pool = Pool::new(factory, PoolConfig::new(1, 0)).unwrap();

    let cancelled = tokio::time::timeout(Duration::from_millis(10), pool.acquire()).await;
    assert!(cancelled.is_err());

    let stats = pool.stats();
    assert_eq!(stats.creating, 0);
    assert_eq!(stats.leased, 0);
    assert_eq!(tracker.created(), 0);

    // The slot is usable again.
    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.serial, 0);
}

#[tokio::test(start_paused = true)]
async fn freed_slot_skips_timed_out_waiter() {
    let factory = MockFactory::new("db").with_delay(Duration::from_millis(50));
    let tracker = factory.tracker();
    let pool = Pool::new(factory, PoolConfig::new(1, 0)).unwrap();
    tracker.fail_next(1);

    let failing = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Queued behind the failing creation; gives up before the slot frees.
    let impatient = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_timeout(Some(Duration::from_millis(20))).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    let patient = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_timeout(None).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(pool.stats().waiters, 2);

    let err = impatient.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::PoolTimeout { .. }));

    assert!(failing.await.unwrap().is_err());
    let lease = patient.await.unwrap().expect("patient waiter gets the freed slot");
    assert_eq!(lease.serial, 0);

    let stats = pool.stats();
    assert_eq!(stats.waiters, 0);
    assert_eq!(stats.creating, 0);
    assert_eq!(stats.leased, 1);
    assert_eq!(stats.timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_racing_a_release_resolves_to_exactly_one_owner() {
    let factory = MockFactory::new("db");
    let tracker = factory.tracker();
    let pool = Pool::new(factory, PoolConfig::new(1, 0)).unwrap();
    let held = pool.acquire().await.unwrap();

    // Release and timeout are due at the same instant.
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(held);
    });
    let outcome = pool
        .acquire_timeout(Some(Duration::from_millis(100)))
        .await;
    releaser.await.unwrap();

    let stats = pool.stats();
    match outcome {
        Ok(lease) => {
            assert_eq!(lease.id().seq(), 0);
            assert_eq!(stats.leased, 1);
            assert_eq!(stats.idle, 0);
        }
        Err(err) => {
            assert!(matches!(err, Error::PoolTimeout { .. }), "got: {err:?}");
            assert_eq!(stats.leased, 0);
            assert_eq!(stats.idle, 1);
        }
    }
    assert_eq!(stats.waiters, 0);
    assert_eq!(tracker.created(), 1, "never created-and-dropped");
    assert!(tracker.destroyed().is_empty());
}
