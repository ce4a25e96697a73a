//! Lifecycle event dispatch.
//!
//! Observers registered through [`Pool::on_event`](crate::Pool::on_event) are
//! called synchronously, in registration order, after the pool has left its
//! critical section. A failing or panicking observer never fails the pool
//! operation that triggered it: the failure is logged and broadcast on a
//! side-channel obtained from [`Observers::subscribe_failures`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::BoxError;
use crate::lease::ResourceId;

// ---------------------------------------------------------------------------
// EventKind / PoolEvent
// ---------------------------------------------------------------------------

/// Lifecycle points observers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new resource was created by the factory.
    Create,
    /// A resource was leased to a caller.
    Checkout,
    /// A leased resource was released by its holder.
    Checkin,
    /// The pool permanently removed a resource.
    Destroy,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Checkout => write!(f, "checkout"),
            Self::Checkin => write!(f, "checkin"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Payload handed to every observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolEvent {
    /// What happened.
    pub kind: EventKind,
    /// Which resource it happened to.
    pub resource_id: ResourceId,
    /// When the pool emitted the event.
    pub at: DateTime<Utc>,
}

/// Error type observers may return.
pub type ObserverError = BoxError;

type Handler = Arc<dyn Fn(&PoolEvent) -> Result<(), ObserverError> + Send + Sync>;

// ---------------------------------------------------------------------------
// ObserverFailure
// ---------------------------------------------------------------------------

/// An observer returned an error or panicked.
#[derive(Debug, Clone)]
pub struct ObserverFailure {
    /// Event being dispatched when the observer failed.
    pub kind: EventKind,
    /// Resource the event was about.
    pub resource_id: ResourceId,
    /// Position of the observer in registration order.
    pub observer_index: usize,
    /// Error message or panic payload.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Ordered observer list with fault-isolated dispatch.
pub struct Observers {
    handlers: RwLock<Vec<(EventKind, Handler)>>,
    failures: broadcast::Sender<ObserverFailure>,
}

impl Observers {
    /// Create an empty list whose failure channel buffers `buffer` entries.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        let (failures, _) = broadcast::channel(buffer.max(1));
        Self {
            handlers: RwLock::new(Vec::new()),
            failures,
        }
    }

    /// Append `handler` for events of `kind`.
    pub fn register<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&PoolEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.handlers.write().push((kind, Arc::new(handler)));
    }

    /// Number of registered observers across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Subscribe to observer failures.
    #[must_use]
    pub fn subscribe_failures(&self) -> broadcast::Receiver<ObserverFailure> {
        self.failures.subscribe()
    }

    /// Call every observer registered for `kind`, in registration order.
    pub fn dispatch(&self, kind: EventKind, resource_id: ResourceId) {
        // Snapshot under the lock so observers may register further observers.
        let handlers: Vec<(usize, Handler)> = {
            let guard = self.handlers.read();
            guard
                .iter()
                .enumerate()
                .filter(|(_, (k, _))| *k == kind)
                .map(|(index, (_, h))| (index, Arc::clone(h)))
                .collect()
        };
        if handlers.is_empty() {
            return;
        }

        let event = PoolEvent {
            kind,
            resource_id,
            at: Utc::now(),
        };

        for (observer_index, handler) in handlers {
            let message = match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            tracing::warn!(
                event = %kind,
                resource_id = %resource_id,
                observer_index,
                error = %message,
                "Pool observer failed"
            );
            // No subscribers is fine.
            let _ = self.failures.send(ObserverFailure {
                kind,
                resource_id,
                observer_index,
                message,
            });
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("observer_count", &self.len())
            .field("failure_subscribers", &self.failures.receiver_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("observer panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("observer panicked: {s}")
    } else {
        "observer panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn rid(seq: u64) -> ResourceId {
        ResourceId::new(1, seq)
    }

    #[test]
    fn dispatch_without_observers_is_noop() {
        let observers = Observers::new(8);
        assert!(observers.is_empty());
        observers.dispatch(EventKind::Create, rid(0));
    }

    #[test]
    fn observers_run_in_registration_order_and_filter_by_kind() {
        let observers = Observers::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (label, kind) in [
            ("a", EventKind::Checkout),
            ("b", EventKind::Checkin),
            ("c", EventKind::Checkout),
        ] {
            let seen = Arc::clone(&seen);
            observers.register(kind, move |event| {
                seen.lock().push((label, event.kind, event.resource_id));
                Ok(())
            });
        }

        observers.dispatch(EventKind::Checkout, rid(7));

        assert_eq!(
            *seen.lock(),
            vec![
                ("a", EventKind::Checkout, rid(7)),
                ("c", EventKind::Checkout, rid(7)),
            ]
        );
    }

    #[tokio::test]
    async fn failing_observer_is_isolated_and_reported() {
        let observers = Observers::new(8);
        let mut failures = observers.subscribe_failures();
        let later_ran = Arc::new(Mutex::new(false));

        observers.register(EventKind::Create, |_| Err("disk full".into()));
        observers.register(EventKind::Create, |_| panic!("boom"));
        {
            let later_ran = Arc::clone(&later_ran);
            observers.register(EventKind::Create, move |_| {
                *later_ran.lock() = true;
                Ok(())
            });
        }

        observers.dispatch(EventKind::Create, rid(3));

        assert!(*later_ran.lock(), "observers after a failure still run");

        let first = failures.recv().await.unwrap();
        assert_eq!(first.observer_index, 0);
        assert_eq!(first.message, "disk full");
        assert_eq!(first.resource_id, rid(3));

        let second = failures.recv().await.unwrap();
        assert_eq!(second.observer_index, 1);
        assert_eq!(second.message, "observer panicked: boom");
    }

    #[test]
    fn event_kind_display() {
        assert_eq!(EventKind::Create.to_string(), "create");
        assert_eq!(EventKind::Checkout.to_string(), "checkout");
        assert_eq!(EventKind::Checkin.to_string(), "checkin");
        assert_eq!(EventKind::Destroy.to_string(), "destroy");
    }
}
