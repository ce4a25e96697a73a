//! Error types for pool operations
use std::time::Duration;

use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error accepted as the source of factory failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by [`Pool`](crate::Pool) and [`ResourceFactory`](crate::ResourceFactory)
/// implementations.
#[derive(Error, Debug)]
pub enum Error {
    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// The factory failed to create a new resource
    #[error("Failed to create resource for '{resource_id}': {reason}")]
    ResourceCreation {
        /// The factory identifier
        resource_id: String,
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<BoxError>,
    },

    /// No resource became available within the requested timeout
    #[error(
        "Timed out after {}ms waiting for '{resource_id}': {leased}/{capacity} leased, {waiters} waiting",
        .timeout.as_millis()
    )]
    PoolTimeout {
        /// The factory identifier
        resource_id: String,
        /// The timeout the caller asked for
        timeout: Duration,
        /// Resources leased when the timeout fired
        leased: usize,
        /// `base_capacity + max_overflow`
        capacity: usize,
        /// Callers still queued when the timeout fired
        waiters: usize,
    },

    /// A lease was released to a pool that did not grant it
    #[error("Invalid release of '{resource_id}': {reason}")]
    InvalidRelease {
        /// Identity of the released resource
        resource_id: String,
        /// Why the release was rejected
        reason: String,
    },

    /// The pool has been shut down
    #[error("Pool for '{resource_id}' is closed")]
    PoolClosed {
        /// The factory identifier
        resource_id: String,
    },

    /// Tearing a resource down failed
    #[error("Failed to destroy resource '{resource_id}': {reason}")]
    Destroy {
        /// Identity of the resource being destroyed
        resource_id: String,
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a resource-creation error without an underlying source
    pub fn creation<I: Into<String>, R: Into<String>>(resource_id: I, reason: R) -> Self {
        Self::ResourceCreation {
            resource_id: resource_id.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a resource-creation error wrapping `source`
    pub fn creation_with<I, E>(resource_id: I, source: E) -> Self
    where
        I: Into<String>,
        E: Into<BoxError>,
    {
        let source = source.into();
        Self::ResourceCreation {
            resource_id: resource_id.into(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a destroy error without an underlying source
    pub fn destroy<I: Into<String>, R: Into<String>>(resource_id: I, reason: R) -> Self {
        Self::Destroy {
            resource_id: resource_id.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn closed(resource_id: &str) -> Self {
        Self::PoolClosed {
            resource_id: resource_id.to_string(),
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolTimeout { .. })
    }

    /// Get the resource ID associated with this error (if any)
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Self::Configuration { .. } => None,
            Self::ResourceCreation { resource_id, .. }
            | Self::PoolTimeout { resource_id, .. }
            | Self::InvalidRelease { resource_id, .. }
            | Self::PoolClosed { resource_id }
            | Self::Destroy { resource_id, .. } => Some(resource_id),
        }
    }
}
