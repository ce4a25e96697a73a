//! Concurrent stress test for the pool.
//!
//! Many tasks run acquire/use/release cycles in parallel; no resource may
//! ever be held by two callers at once and the leased count must stay within
//! capacity.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use queuepool::testing::MockFactory;
use queuepool::{Pool, PoolConfig};
use tokio::task::JoinSet;

const TASKS: usize = 32;
const CYCLES: usize = 50;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_parallel_cycles_keep_leases_exclusive() {
    let factory = MockFactory::new("stress").with_delay(Duration::from_micros(100));
    let tracker = factory.tracker();
    let config = PoolConfig::new(4, 2).with_timeout(Duration::from_secs(10));
    let capacity = config.capacity();
    let pool = Pool::new(factory, config).unwrap();

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicU64::new(0));
    let mut set = JoinSet::new();

    for task in 0..TASKS {
        let pool = pool.clone();
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        let completed = Arc::clone(&completed);
        set.spawn(async move {
            for cycle in 0..CYCLES {
                let lease = pool.acquire().await.expect("task should acquire");
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                assert!(lease.enter(), "resource {} leased twice", lease.id());
                if (task + cycle) % 3 == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                } else {
                    tokio::task::yield_now().await;
                }
                lease.exit();

                in_flight.fetch_sub(1, Ordering::SeqCst);
                if cycle % 2 == 0 {
                    lease.release().await.expect("release to owning pool");
                } else {
                    drop(lease);
                }
            }
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while let Some(result) = tokio::time::timeout_at(deadline, set.join_next())
        .await
        .expect("stress test should not deadlock (30s timeout)")
    {
        result.expect("task should not panic");
    }

    assert_eq!(completed.load(Ordering::SeqCst), TASKS as u64);
    assert!(
        peak.load(Ordering::SeqCst) <= capacity,
        "peak concurrent leases {} exceeded capacity {capacity}",
        peak.load(Ordering::SeqCst)
    );

    // Let spawned teardown from dropped leases finish.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = pool.stats();
    let total = (TASKS * CYCLES) as u64;
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.waiters, 0);
    assert_eq!(stats.creating, 0);
    assert_eq!(stats.checkouts, total);
    assert_eq!(stats.checkins, total);
    assert!(stats.idle <= 4, "idle {} above base capacity", stats.idle);
    assert_eq!(
        stats.created - stats.destroyed,
        stats.idle as u64,
        "every live resource is idle"
    );
    assert_eq!(tracker.created(), stats.created);
    assert_eq!(tracker.destroyed().len() as u64, stats.destroyed);
}
