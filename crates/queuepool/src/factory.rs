//! The `ResourceFactory` trait: how the pool creates and tears down resources.

use async_trait::async_trait;

use crate::error::Result;

/// Creates live resources on demand for a [`Pool`](crate::Pool).
///
/// `create` may be slow (a network handshake, say). The pool never holds its
/// internal lock while it runs; capacity is reserved beforehand and rolled
/// back if creation fails.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The resource handed out to lease holders.
    type Resource: Send + 'static;

    /// Identifier used in errors and logs (e.g. "postgres", "sqlite").
    fn id(&self) -> &str;

    /// Create a new live resource.
    async fn create(&self) -> Result<Self::Resource>;

    /// Tear a resource down when the pool permanently removes it.
    ///
    /// Errors are logged by the pool and never reach acquire/release callers.
    async fn destroy(&self, resource: Self::Resource) -> Result<()> {
        drop(resource);
        Ok(())
    }
}
