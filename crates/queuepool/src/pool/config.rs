//! Pool configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`Pool`](super::Pool).
///
/// Fixed at construction; the pool never resizes at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Resources kept alive once demand subsides
    pub base_capacity: usize,
    /// Extra resources that may be created during a burst
    pub max_overflow: usize,
    /// Timeout used by [`Pool::acquire`](super::Pool::acquire)
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub default_timeout: Duration,
    /// Buffer of the observer-failure broadcast channel
    pub event_buffer: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_capacity: 5,
            max_overflow: 10,
            default_timeout: Duration::from_secs(30),
            event_buffer: 64,
        }
    }
}

impl PoolConfig {
    /// Config with the given capacities and the default timeout.
    #[must_use]
    pub fn new(base_capacity: usize, max_overflow: usize) -> Self {
        Self {
            base_capacity,
            max_overflow,
            ..Self::default()
        }
    }

    /// Builder-style setter for [`default_timeout`](Self::default_timeout).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Hard upper bound on simultaneously leased resources.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.base_capacity + self.max_overflow
    }

    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.base_capacity == 0 {
            return Err(Error::configuration(
                "base_capacity must be greater than 0",
            ));
        }
        if self.base_capacity.checked_add(self.max_overflow).is_none() {
            return Err(Error::configuration(format!(
                "base_capacity ({}) + max_overflow ({}) overflows",
                self.base_capacity, self.max_overflow
            )));
        }
        if self.event_buffer == 0 {
            return Err(Error::configuration(
                "event_buffer must be greater than 0",
            ));
        }
        Ok(())
    }
}
