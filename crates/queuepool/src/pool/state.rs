//! Lock-protected pool bookkeeping.
//!
//! Every method here runs while the caller holds the pool mutex, so nothing
//! in this module awaits, calls the factory, or notifies observers.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use tokio::sync::oneshot;

use super::PoolStats;
use crate::lease::ResourceId;

/// A live resource together with its pool identity.
pub(crate) struct Pooled<T> {
    pub(crate) id: ResourceId,
    pub(crate) created_at: Instant,
    pub(crate) resource: T,
}

/// What a releaser hands to a waiting caller.
pub(crate) enum Grant<T> {
    /// A released resource, already recorded as leased to the waiter.
    Resource(Pooled<T>),
    /// A reserved creation slot; the waiter must call the factory itself.
    Slot,
}

struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<Grant<T>>,
}

/// Outcome of [`PoolState::begin_checkout`].
pub(crate) enum Checkout<T> {
    /// An idle resource, now leased.
    Ready(Pooled<T>),
    /// A creation slot was reserved for the caller.
    Create {
        /// Whether the new resource takes the live count past `base_capacity`.
        overflow: bool,
    },
    /// The caller was queued.
    Wait {
        waiter_id: u64,
        rx: oneshot::Receiver<Grant<T>>,
    },
}

/// Why [`PoolState::begin_checkout`] refused the caller outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refusal {
    Closed,
    Exhausted,
}

/// Outcome of [`PoolState::finish_create`].
pub(crate) enum Created<T> {
    Leased(Pooled<T>),
    /// The pool closed while the factory was running.
    Closed(Pooled<T>),
}

/// Outcome of [`PoolState::checkin`].
pub(crate) enum Checkin<T> {
    /// Handed straight to the longest-waiting caller.
    Handed,
    /// Returned to the idle set.
    Idle,
    /// Over capacity with nobody waiting; the caller must destroy it.
    Shed(Pooled<T>),
    /// The pool is closed; the caller must destroy it.
    Closed(Pooled<T>),
}

/// Counters that only ever grow.
#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    created: u64,
    destroyed: u64,
    checkouts: u64,
    checkins: u64,
    timeouts: u64,
}

pub(crate) struct PoolState<T> {
    pool_id: u64,
    base_capacity: usize,
    max_overflow: usize,
    idle: VecDeque<Pooled<T>>,
    /// Sequence numbers of leased resources.
    leased: HashSet<u64>,
    /// Capacity reserved for in-flight `create()` calls.
    creating: usize,
    waiters: VecDeque<Waiter<T>>,
    next_waiter: u64,
    next_seq: u64,
    closed: bool,
    totals: Totals,
}

impl<T> PoolState<T> {
    pub(crate) fn new(pool_id: u64, base_capacity: usize, max_overflow: usize) -> Self {
        Self {
            pool_id,
            base_capacity,
            max_overflow,
            idle: VecDeque::with_capacity(base_capacity),
            leased: HashSet::with_capacity(base_capacity + max_overflow),
            creating: 0,
            waiters: VecDeque::new(),
            next_waiter: 0,
            next_seq: 0,
            closed: false,
            totals: Totals::default(),
        }
    }

    fn capacity(&self) -> usize {
        self.base_capacity + self.max_overflow
    }

    fn live(&self) -> usize {
        self.idle.len() + self.leased.len() + self.creating
    }

    /// Live resources beyond `base_capacity`.
    pub(crate) fn overflow(&self) -> usize {
        self.live().saturating_sub(self.base_capacity)
    }

    pub(crate) fn leased(&self) -> usize {
        self.leased.len()
    }

    pub(crate) fn waiting(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Start an acquisition: idle fast path, then a creation slot, then the
    /// wait queue (only when `may_wait`).
    pub(crate) fn begin_checkout(&mut self, may_wait: bool) -> Result<Checkout<T>, Refusal> {
        if self.closed {
            return Err(Refusal::Closed);
        }

        if let Some(pooled) = self.idle.pop_front() {
            self.mark_leased(&pooled);
            return Ok(Checkout::Ready(pooled));
        }

        // A queued caller is owed the next free slot; never jump the queue.
        if self.waiters.is_empty() && self.leased.len() + self.creating < self.capacity() {
            let overflow = self.reserve_slot();
            return Ok(Checkout::Create { overflow });
        }

        if !may_wait {
            self.totals.timeouts += 1;
            return Err(Refusal::Exhausted);
        }

        let (tx, rx) = oneshot::channel();
        let waiter_id = self.next_waiter;
        self.next_waiter += 1;
        self.waiters.push_back(Waiter { id: waiter_id, tx });
        Ok(Checkout::Wait { waiter_id, rx })
    }

    fn reserve_slot(&mut self) -> bool {
        let overflow = self.live() >= self.base_capacity;
        self.creating += 1;
        overflow
    }

    fn mark_leased(&mut self, pooled: &Pooled<T>) {
        self.leased.insert(pooled.id.seq());
        self.totals.checkouts += 1;
    }

    /// Give back a reserved creation slot, passing it to the next waiter if
    /// one is queued.
    pub(crate) fn release_slot(&mut self) {
        self.creating = self.creating.saturating_sub(1);
        if self.closed {
            return;
        }
        while let Some(waiter) = self.waiters.pop_front() {
            self.creating += 1;
            if waiter.tx.send(Grant::Slot).is_ok() {
                return;
            }
            self.creating -= 1;
        }
    }

    /// Record a successfully created resource against its reserved slot.
    pub(crate) fn finish_create(&mut self, resource: T) -> Created<T> {
        self.creating = self.creating.saturating_sub(1);
        let pooled = Pooled {
            id: ResourceId::new(self.pool_id, self.next_seq),
            created_at: Instant::now(),
            resource,
        };
        self.next_seq += 1;
        self.totals.created += 1;

        if self.closed {
            self.totals.destroyed += 1;
            return Created::Closed(pooled);
        }
        self.mark_leased(&pooled);
        Created::Leased(pooled)
    }

    /// Whether `id` is currently leased from this pool.
    pub(crate) fn is_leased(&self, id: ResourceId) -> bool {
        id.pool() == self.pool_id && self.leased.contains(&id.seq())
    }

    /// Return a leased resource.
    ///
    /// Fails with the resource handed back when it is not leased from this
    /// pool; state is untouched in that case.
    pub(crate) fn checkin(&mut self, pooled: Pooled<T>) -> Result<Checkin<T>, Pooled<T>> {
        if pooled.id.pool() != self.pool_id || !self.leased.remove(&pooled.id.seq()) {
            return Err(pooled);
        }
        self.totals.checkins += 1;

        if self.closed {
            self.totals.destroyed += 1;
            return Ok(Checkin::Closed(pooled));
        }

        let mut pooled = pooled;
        while let Some(waiter) = self.waiters.pop_front() {
            self.mark_leased(&pooled);
            match waiter.tx.send(Grant::Resource(pooled)) {
                Ok(()) => return Ok(Checkin::Handed),
                Err(Grant::Resource(returned)) => {
                    // Receiver dropped without deregistering; undo and try the next.
                    self.leased.remove(&returned.id.seq());
                    self.totals.checkouts -= 1;
                    pooled = returned;
                }
                Err(Grant::Slot) => unreachable!("sent a resource grant"),
            }
        }

        // `pooled` is no longer counted as live; a full idle set means it is
        // the one past `base_capacity`.
        if self.idle.len() >= self.base_capacity {
            self.totals.destroyed += 1;
            return Ok(Checkin::Shed(pooled));
        }

        self.idle.push_back(pooled);
        Ok(Checkin::Idle)
    }

    /// Remove a queued waiter. Returns `false` if it was already granted or
    /// the queue was cleared by shutdown.
    pub(crate) fn cancel_waiter(&mut self, waiter_id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == waiter_id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn record_timeout(&mut self) {
        self.totals.timeouts += 1;
    }

    /// Close the pool: drop every waiter's sender and hand back idle
    /// resources for destruction.
    pub(crate) fn close(&mut self) -> Vec<Pooled<T>> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        self.waiters.clear();
        let drained: Vec<_> = self.idle.drain(..).collect();
        self.totals.destroyed += drained.len() as u64;
        drained
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            base_capacity: self.base_capacity,
            max_overflow: self.max_overflow,
            leased: self.leased.len(),
            idle: self.idle.len(),
            creating: self.creating,
            overflow: self.overflow(),
            waiters: self.waiters.len(),
            closed: self.closed,
            created: self.totals.created,
            destroyed: self.totals.destroyed,
            checkouts: self.totals.checkouts,
            checkins: self.totals.checkins,
            timeouts: self.totals.timeouts,
        }
    }
}
