//! # queuepool
//!
//! A bounded, shareable resource pool in the style of a database connection
//! pool: a fixed base capacity, a limited overflow allowance that is shed
//! once demand subsides, FIFO waiters with acquisition timeouts, and
//! fault-isolated lifecycle observers.
//!
//! ```rust,ignore
//! let pool = Pool::new(factory, PoolConfig::new(3, 1))?;
//! pool.on_event(EventKind::Checkout, |event| {
//!     tracing::info!(resource = %event.resource_id, "checked out");
//!     Ok(())
//! });
//!
//! let conn = pool.acquire().await?;
//! conn.query("SELECT 1").await?;
//! conn.release().await?;
//! ```

pub mod error;
pub mod events;
pub mod factory;
pub mod lease;
pub mod pool;

#[cfg(feature = "testing")]
pub mod testing;

pub use error::{Error, Result};
pub use events::{EventKind, ObserverError, ObserverFailure, PoolEvent};
pub use factory::ResourceFactory;
pub use lease::{Lease, ResourceId};
pub use pool::{Pool, PoolConfig, PoolStats};
