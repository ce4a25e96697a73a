//! Resource pool: bounded leasing over a [`ResourceFactory`].
//!
//! `Pool<F>` keeps up to `base_capacity` resources alive, allows bursts of
//! up to `max_overflow` more, and queues callers FIFO once both are in use.
//! All bookkeeping lives in [`state::PoolState`] behind one mutex; the
//! factory, teardown and observers are always called with the lock released.

pub mod config;
pub(crate) mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::error::{Error, Result};
use crate::events::{EventKind, ObserverError, ObserverFailure, Observers, PoolEvent};
use crate::factory::ResourceFactory;
use crate::lease::{Lease, ResourceId};

pub use config::PoolConfig;
use state::{Checkin, Checkout, Created, Grant, PoolState, Pooled, Refusal};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured base capacity.
    pub base_capacity: usize,
    /// Configured overflow allowance.
    pub max_overflow: usize,
    /// Resources currently leased.
    pub leased: usize,
    /// Resources sitting idle in the pool.
    pub idle: usize,
    /// Creation slots reserved for in-flight factory calls.
    pub creating: usize,
    /// Live resources beyond `base_capacity`.
    pub overflow: usize,
    /// Callers queued for a resource.
    pub waiters: usize,
    /// Whether [`Pool::shutdown`] has been called.
    pub closed: bool,
    /// Resources ever created.
    pub created: u64,
    /// Resources ever destroyed (or scheduled for teardown).
    pub destroyed: u64,
    /// Successful checkouts.
    pub checkouts: u64,
    /// Releases accepted by the pool.
    pub checkins: u64,
    /// Acquisitions that gave up waiting.
    pub timeouts: u64,
}

impl PoolStats {
    /// Resources alive right now, including those being created.
    #[must_use]
    pub fn live(&self) -> usize {
        self.idle + self.leased + self.creating
    }
}

/// Why the pool is tearing a resource down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestroyReason {
    /// Released with nobody waiting while the idle set was full.
    Shed,
    /// The pool is shut down.
    Closed,
}

impl std::fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shed => write!(f, "overflow shed"),
            Self::Closed => write!(f, "pool closed"),
        }
    }
}

/// Inner shared state for the pool.
struct PoolInner<F: ResourceFactory> {
    id: u64,
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Resource>>,
    observers: Observers,
}

/// Bounded resource pool with overflow, FIFO waiters and lifecycle observers.
///
/// Cloning is cheap; clones share the same pool.
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("resource_id", &self.inner.factory.id())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a pool over `factory`.
    ///
    /// No resource is created up front; the first acquisitions populate the
    /// pool.
    ///
    /// # Errors
    /// Returns error if `config` is invalid (e.g. `base_capacity == 0`).
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            pool = id,
            resource_id = factory.id(),
            base_capacity = config.base_capacity,
            max_overflow = config.max_overflow,
            default_timeout_ms = config.default_timeout.as_millis() as u64,
            "Pool created"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                state: Mutex::new(PoolState::new(
                    id,
                    config.base_capacity,
                    config.max_overflow,
                )),
                observers: Observers::new(config.event_buffer),
                factory,
                config,
            }),
        })
    }

    /// Identifier of the underlying factory.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        self.inner.factory.id()
    }

    /// The configuration the pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Register an observer for `kind` events.
    ///
    /// Observers run synchronously, in registration order, outside the pool
    /// lock. Errors and panics are reported through
    /// [`subscribe_failures`](Self::subscribe_failures) and never reach the
    /// caller of the operation that triggered them.
    pub fn on_event<H>(&self, kind: EventKind, handler: H)
    where
        H: Fn(&PoolEvent) -> std::result::Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.inner.observers.register(kind, handler);
    }

    /// Subscribe to observer failures.
    #[must_use]
    pub fn subscribe_failures(&self) -> broadcast::Receiver<ObserverFailure> {
        self.inner.observers.subscribe_failures()
    }

    /// Acquire a resource, waiting at most the configured `default_timeout`.
    pub async fn acquire(&self) -> Result<Lease<F>> {
        self.acquire_timeout(Some(self.inner.config.default_timeout)).await
    }

    /// Acquire a resource.
    ///
    /// `Some(Duration::ZERO)` never waits; `None` waits until a resource
    /// frees up or the pool shuts down.
    ///
    /// # Errors
    /// - [`Error::PoolClosed`] after [`shutdown`](Self::shutdown).
    /// - [`Error::PoolTimeout`] if nothing became available in time.
    /// - [`Error::ResourceCreation`] if the factory failed.
    pub async fn acquire_timeout(&self, timeout: Option<Duration>) -> Result<Lease<F>> {
        let may_wait = timeout != Some(Duration::ZERO);
        let step = self.inner.state.lock().begin_checkout(may_wait);

        match step {
            Ok(Checkout::Ready(pooled)) => Ok(self.lease_out(pooled)),
            Ok(Checkout::Create { overflow }) => {
                self.create_leased(Reservation::new(self), overflow).await
            }
            Ok(Checkout::Wait { waiter_id, rx }) => self.wait(waiter_id, rx, timeout).await,
            Err(Refusal::Closed) => Err(Error::closed(self.resource_id())),
            Err(Refusal::Exhausted) => {
                let err = self.timeout_error(Duration::ZERO);
                tracing::debug!(resource_id = self.resource_id(), error = %err, "Acquire refused");
                Err(err)
            }
        }
    }

    /// Release a lease granted by this pool, awaiting any teardown.
    ///
    /// # Errors
    /// [`Error::InvalidRelease`] if the lease belongs to a different pool; the
    /// lease then returns to its own pool when dropped.
    pub async fn release(&self, lease: Lease<F>) -> Result<()> {
        if lease.pool_id() != self.inner.id {
            return Err(Error::InvalidRelease {
                resource_id: lease.id().to_string(),
                reason: format!(
                    "lease belongs to pool {}, not pool {}",
                    lease.pool_id(),
                    self.inner.id
                ),
            });
        }
        lease.release().await
    }

    /// Shut the pool down.
    ///
    /// Idle resources are destroyed, queued callers fail with
    /// [`Error::PoolClosed`], later acquisitions fail immediately, and
    /// resources still leased are destroyed when released.
    pub async fn shutdown(&self) {
        let (drained, leased) = {
            let mut state = self.inner.state.lock();
            (state.close(), state.leased())
        };
        tracing::info!(
            resource_id = self.resource_id(),
            destroyed = drained.len(),
            still_leased = leased,
            "Pool shut down"
        );
        for pooled in drained {
            self.destroy(pooled, DestroyReason::Closed).await;
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().is_closed()
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats()
    }

    /// One-line summary of the pool, suitable for logs.
    #[must_use]
    pub fn status(&self) -> String {
        let stats = self.stats();
        format!(
            "Pool size: {}  Idle: {}  Leased: {}  Overflow: {}/{}  Waiters: {}",
            stats.base_capacity,
            stats.idle,
            stats.leased,
            stats.overflow,
            stats.max_overflow,
            stats.waiters
        )
    }

    // -----------------------------------------------------------------------
    // Acquisition internals
    // -----------------------------------------------------------------------

    fn lease_out(&self, pooled: Pooled<F::Resource>) -> Lease<F> {
        let id = pooled.id;
        tracing::debug!(resource_id = %id, "Resource checked out");
        self.inner.observers.dispatch(EventKind::Checkout, id);
        Lease::new(pooled, self.clone())
    }

    /// Run the factory against a reserved slot and lease the result.
    async fn create_leased(
        &self,
        reservation: Reservation<'_, F>,
        overflow: bool,
    ) -> Result<Lease<F>> {
        let created = self.inner.factory.create().await;
        let resource = match created {
            Ok(resource) => resource,
            Err(err) => {
                drop(reservation);
                let err = into_creation_error(self.resource_id(), err);
                tracing::warn!(resource_id = self.resource_id(), error = %err, "Resource creation failed");
                return Err(err);
            }
        };

        reservation.commit();
        let outcome = self.inner.state.lock().finish_create(resource);
        match outcome {
            Created::Leased(pooled) => {
                tracing::debug!(resource_id = %pooled.id, overflow, "Resource created");
                self.inner.observers.dispatch(EventKind::Create, pooled.id);
                Ok(self.lease_out(pooled))
            }
            Created::Closed(pooled) => {
                self.inner.observers.dispatch(EventKind::Create, pooled.id);
                self.destroy(pooled, DestroyReason::Closed).await;
                Err(Error::closed(self.resource_id()))
            }
        }
    }

    /// Wait in the queue until granted, timed out, or closed.
    async fn wait(
        &self,
        waiter_id: u64,
        rx: oneshot::Receiver<Grant<F::Resource>>,
        timeout: Option<Duration>,
    ) -> Result<Lease<F>> {
        tracing::debug!(
            resource_id = self.resource_id(),
            waiter_id,
            "Pool exhausted, waiting"
        );
        let mut waiting = Waiting {
            pool: self,
            waiter_id,
            rx: Some(rx),
        };

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, waiting.recv()).await.ok(),
            None => Some(waiting.recv().await),
        };

        let grant = match received {
            Some(Some(grant)) => grant,
            Some(None) => return Err(Error::closed(self.resource_id())),
            None => match waiting.abandon() {
                Abandoned::Granted(grant) => grant,
                Abandoned::Closed => return Err(Error::closed(self.resource_id())),
                Abandoned::TimedOut => {
                    let err = self.timeout_error(timeout.unwrap_or_default());
                    tracing::warn!(resource_id = self.resource_id(), error = %err, "Acquire timed out");
                    return Err(err);
                }
            },
        };
        waiting.disarm();

        match grant {
            Grant::Resource(pooled) => Ok(self.lease_out(pooled)),
            Grant::Slot => {
                // The releaser already counted this slot as reserved.
                let overflow = self.inner.state.lock().overflow() > 0;
                self.create_leased(Reservation::new(self), overflow).await
            }
        }
    }

    fn timeout_error(&self, timeout: Duration) -> Error {
        let state = self.inner.state.lock();
        Error::PoolTimeout {
            resource_id: self.resource_id().to_string(),
            timeout,
            leased: state.leased(),
            capacity: self.inner.config.capacity(),
            waiters: state.waiting(),
        }
    }

    /// Put back a grant that reached a caller who no longer wants it.
    fn reclaim(&self, grant: Grant<F::Resource>) {
        match grant {
            Grant::Resource(pooled) => self.check_in_on_drop(pooled, Duration::ZERO),
            Grant::Slot => self.inner.state.lock().release_slot(),
        }
    }

    // -----------------------------------------------------------------------
    // Release internals
    // -----------------------------------------------------------------------

    /// State transition for a release; returns the resource if it must be
    /// destroyed.
    fn return_to_pool(
        &self,
        pooled: Pooled<F::Resource>,
        held: Duration,
    ) -> Result<Option<(Pooled<F::Resource>, DestroyReason)>> {
        let id = pooled.id;
        if id.pool() != self.inner.id {
            return Err(Error::InvalidRelease {
                resource_id: id.to_string(),
                reason: format!("resource belongs to pool {}", id.pool()),
            });
        }
        if !self.inner.state.lock().is_leased(id) {
            return Err(not_leased(id));
        }
        // Only the lease holder can return `id`, so it stays leased until the
        // transition below. Checkin precedes any checkout the handoff triggers.
        self.inner.observers.dispatch(EventKind::Checkin, id);

        let outcome = self.inner.state.lock().checkin(pooled);
        let held_ms = held.as_millis() as u64;
        match outcome {
            Ok(Checkin::Handed) => {
                tracing::debug!(resource_id = %id, held_ms, "Resource handed to waiter");
                Ok(None)
            }
            Ok(Checkin::Idle) => {
                tracing::debug!(resource_id = %id, held_ms, "Resource checked in");
                Ok(None)
            }
            Ok(Checkin::Shed(pooled)) => {
                tracing::debug!(resource_id = %id, held_ms, "Overflow resource shed");
                Ok(Some((pooled, DestroyReason::Shed)))
            }
            Ok(Checkin::Closed(pooled)) => Ok(Some((pooled, DestroyReason::Closed))),
            Err(_rejected) => Err(not_leased(id)),
        }
    }

    pub(crate) async fn check_in(&self, pooled: Pooled<F::Resource>, held: Duration) -> Result<()> {
        if let Some((pooled, reason)) = self.return_to_pool(pooled, held)? {
            self.destroy(pooled, reason).await;
        }
        Ok(())
    }

    /// Release from a `Drop` context: the state transition happens now, any
    /// teardown is spawned onto the current runtime.
    pub(crate) fn check_in_on_drop(&self, pooled: Pooled<F::Resource>, held: Duration) {
        match self.return_to_pool(pooled, held) {
            Ok(Some((pooled, reason))) => self.spawn_destroy(pooled, reason),
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "Dropped lease was rejected by its pool"),
        }
    }

    async fn destroy(&self, pooled: Pooled<F::Resource>, reason: DestroyReason) {
        let id = pooled.id;
        if let Err(err) = self.inner.factory.destroy(pooled.resource).await {
            tracing::warn!(resource_id = %id, %reason, error = %err, "Resource teardown failed");
        } else {
            tracing::debug!(resource_id = %id, %reason, "Resource destroyed");
        }
        self.inner.observers.dispatch(EventKind::Destroy, id);
    }

    fn spawn_destroy(&self, pooled: Pooled<F::Resource>, reason: DestroyReason) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.clone();
                drop(handle.spawn(async move { pool.destroy(pooled, reason).await }));
            }
            Err(_) => {
                // No runtime to run async teardown on; drop in place.
                let id = pooled.id;
                drop(pooled);
                tracing::debug!(resource_id = %id, %reason, "Resource dropped without runtime");
                self.inner.observers.dispatch(EventKind::Destroy, id);
            }
        }
    }
}

fn not_leased(id: ResourceId) -> Error {
    Error::InvalidRelease {
        resource_id: id.to_string(),
        reason: "resource is not currently leased".to_string(),
    }
}

fn into_creation_error(resource_id: &str, err: Error) -> Error {
    match err {
        err @ Error::ResourceCreation { .. } => err,
        other => Error::ResourceCreation {
            resource_id: resource_id.to_string(),
            reason: other.to_string(),
            source: Some(Box::new(other)),
        },
    }
}

// ---------------------------------------------------------------------------
// Cancellation guards
// ---------------------------------------------------------------------------

/// A reserved creation slot, rolled back on drop unless committed.
struct Reservation<'a, F: ResourceFactory> {
    pool: &'a Pool<F>,
    armed: bool,
}

impl<'a, F: ResourceFactory> Reservation<'a, F> {
    fn new(pool: &'a Pool<F>) -> Self {
        Self { pool, armed: true }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl<F: ResourceFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.inner.state.lock().release_slot();
        }
    }
}

enum Abandoned<T> {
    Granted(Grant<T>),
    Closed,
    TimedOut,
}

/// A queued caller; dropping it deregisters and reclaims any grant in flight.
struct Waiting<'a, F: ResourceFactory> {
    pool: &'a Pool<F>,
    waiter_id: u64,
    rx: Option<oneshot::Receiver<Grant<F::Resource>>>,
}

impl<F: ResourceFactory> Waiting<'_, F> {
    /// Wait for a grant; `None` means the pool closed.
    async fn recv(&mut self) -> Option<Grant<F::Resource>> {
        match self.rx.as_mut() {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }

    /// Give up after a timeout.
    ///
    /// Decided under the pool lock: either the waiter is still queued and is
    /// removed, or a releaser already sent it a grant, which the caller keeps.
    fn abandon(&mut self) -> Abandoned<F::Resource> {
        let mut state = self.pool.inner.state.lock();
        if state.cancel_waiter(self.waiter_id) {
            state.record_timeout();
            self.rx = None;
            return Abandoned::TimedOut;
        }
        drop(state);
        match self.rx.take().map(|mut rx| rx.try_recv()) {
            Some(Ok(grant)) => Abandoned::Granted(grant),
            _ => Abandoned::Closed,
        }
    }

    fn disarm(&mut self) {
        self.rx = None;
    }
}

impl<F: ResourceFactory> Drop for Waiting<'_, F> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        if self.pool.inner.state.lock().cancel_waiter(self.waiter_id) {
            return;
        }
        if let Ok(grant) = rx.try_recv() {
            self.pool.reclaim(grant);
        }
    }
}
