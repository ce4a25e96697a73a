//! Testing utilities for pool consumers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::factory::ResourceFactory;

/// Resource produced by [`MockFactory`].
#[derive(Debug)]
pub struct MockResource {
    /// Creation order, starting at 0.
    pub serial: u64,
    /// Set by tests while "using" the resource to detect double leasing.
    pub busy: AtomicBool,
}

impl MockResource {
    /// Mark the resource busy; returns `false` if it already was.
    pub fn enter(&self) -> bool {
        !self.busy.swap(true, Ordering::SeqCst)
    }

    /// Clear the busy flag.
    pub fn exit(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Shared view of what a [`MockFactory`] has done, usable after the factory
/// moved into a pool.
#[derive(Debug, Default)]
pub struct MockTracker {
    created: AtomicU64,
    failed: AtomicU64,
    fail_pending: AtomicUsize,
    fail_destroy_pending: AtomicUsize,
    destroyed: Mutex<Vec<u64>>,
}

impl MockTracker {
    /// Resources successfully created.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Creation attempts that were made to fail.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Serials passed to `destroy`, in call order.
    pub fn destroyed(&self) -> Vec<u64> {
        self.destroyed.lock().clone()
    }

    /// Make the next `n` creation attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_pending.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` teardowns fail (after being recorded).
    pub fn fail_destroy_next(&self, n: usize) {
        self.fail_destroy_pending.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        take_one(&self.fail_pending)
    }

    fn take_destroy_failure(&self) -> bool {
        take_one(&self.fail_destroy_pending)
    }
}

fn take_one(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Counting factory with optional creation latency and injected failures.
#[derive(Debug)]
pub struct MockFactory {
    id: String,
    delay: Duration,
    tracker: Arc<MockTracker>,
}

impl MockFactory {
    /// Factory with no creation latency.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delay: Duration::ZERO,
            tracker: Arc::new(MockTracker::default()),
        }
    }

    /// Sleep for `delay` inside every `create` call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Handle for inspecting the factory once it belongs to a pool.
    pub fn tracker(&self) -> Arc<MockTracker> {
        Arc::clone(&self.tracker)
    }
}

#[async_trait]
impl ResourceFactory for MockFactory {
    type Resource = MockResource;

    fn id(&self) -> &str {
        &self.id
    }

    async fn create(&self) -> Result<MockResource> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.tracker.take_failure() {
            self.tracker.failed.fetch_add(1, Ordering::SeqCst);
            return Err(Error::creation(&self.id, "injected failure"));
        }
        let serial = self.tracker.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockResource {
            serial,
            busy: AtomicBool::new(false),
        })
    }

    async fn destroy(&self, resource: MockResource) -> Result<()> {
        self.tracker.destroyed.lock().push(resource.serial);
        if self.tracker.take_destroy_failure() {
            return Err(Error::destroy(
                format!("{}#{}", self.id, resource.serial),
                "injected teardown failure",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let factory = MockFactory::new("mock");
        let tracker = factory.tracker();
        tracker.fail_next(1);

        assert!(factory.create().await.is_err());
        let resource = factory.create().await.unwrap();
        assert_eq!(resource.serial, 0);
        assert_eq!(tracker.failed(), 1);
        assert_eq!(tracker.created(), 1);

        factory.destroy(resource).await.unwrap();
        assert_eq!(tracker.destroyed(), vec![0]);
    }

    #[tokio::test]
    async fn injected_teardown_failure_still_records_the_destroy() {
        let factory = MockFactory::new("mock");
        let tracker = factory.tracker();
        tracker.fail_destroy_next(1);

        let resource = factory.create().await.unwrap();
        let err = factory.destroy(resource).await.unwrap_err();
        assert!(matches!(err, Error::Destroy { ref resource_id, .. } if resource_id == "mock#0"));
        assert_eq!(tracker.destroyed(), vec![0]);

        let resource = factory.create().await.unwrap();
        factory.destroy(resource).await.unwrap();
    }

    #[test]
    fn busy_flag_detects_reentry() {
        let resource = MockResource {
            serial: 0,
            busy: AtomicBool::new(false),
        };
        assert!(resource.enter());
        assert!(!resource.enter());
        resource.exit();
        assert!(resource.enter());
    }
}
