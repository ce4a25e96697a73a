//! RAII lease over a pooled resource

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::factory::ResourceFactory;
use crate::pool::Pool;
use crate::pool::state::Pooled;

/// Identity of a pooled resource.
///
/// Unique across every pool in the process: `pool` distinguishes pool
/// instances, `seq` numbers resources within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pool: u64,
    seq: u64,
}

impl ResourceId {
    pub(crate) fn new(pool: u64, seq: u64) -> Self {
        Self { pool, seq }
    }

    /// The pool instance that created the resource.
    #[must_use]
    pub fn pool(&self) -> u64 {
        self.pool
    }

    /// Creation order within the pool, starting at 0.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.pool, self.seq)
    }
}

/// Exclusive lease on one pooled resource.
///
/// Dropping the lease releases the resource back to its pool; use
/// [`Lease::release`] to also await any teardown the release triggers.
pub struct Lease<F: ResourceFactory> {
    pooled: Option<Pooled<F::Resource>>,
    pool: Pool<F>,
    leased_at: Instant,
}

impl<F: ResourceFactory> Lease<F> {
    pub(crate) fn new(pooled: Pooled<F::Resource>, pool: Pool<F>) -> Self {
        Self {
            pooled: Some(pooled),
            pool,
            leased_at: Instant::now(),
        }
    }

    fn pooled(&self) -> &Pooled<F::Resource> {
        self.pooled.as_ref().expect("lease used after release")
    }

    /// Identity of the leased resource.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.pooled().id
    }

    /// How long ago the underlying resource was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.pooled().created_at.elapsed()
    }

    /// How long this lease has been held.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.leased_at.elapsed()
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.id().pool()
    }

    /// Release the resource, waiting for any teardown to finish.
    pub async fn release(mut self) -> Result<()> {
        let pooled = self.pooled.take().expect("lease used after release");
        let held = self.leased_at.elapsed();
        self.pool.check_in(pooled, held).await
    }
}

impl<F: ResourceFactory> std::ops::Deref for Lease<F> {
    type Target = F::Resource;

    fn deref(&self) -> &F::Resource {
        &self.pooled().resource
    }
}

impl<F: ResourceFactory> std::ops::DerefMut for Lease<F> {
    fn deref_mut(&mut self) -> &mut F::Resource {
        &mut self
            .pooled
            .as_mut()
            .expect("lease used after release")
            .resource
    }
}

impl<F: ResourceFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.pool.check_in_on_drop(pooled, self.leased_at.elapsed());
        }
    }
}

impl<F> std::fmt::Debug for Lease<F>
where
    F: ResourceFactory,
    F::Resource: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Lease");
        if let Some(pooled) = &self.pooled {
            s.field("id", &pooled.id).field("resource", &pooled.resource);
        }
        s.field("held_for", &self.leased_at.elapsed()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_display_and_order() {
        let a = ResourceId::new(3, 0);
        let b = ResourceId::new(3, 1);
        assert_eq!(a.to_string(), "3:0");
        assert!(a < b);
        assert_eq!(b.pool(), 3);
        assert_eq!(b.seq(), 1);
    }
}
