//! Batcher configuration.
//!
//! A batch is flushed when either threshold fires: `max_batch_size` queued
//! requests, or `max_wait` elapsed since the first unflushed request. Both are
//! optional but at least one must be set. `cache_size` enables the LRU cache
//! in front of the engine.

use std::time::Duration;

use crate::error::{BatchError, BatchResult};

/// Environment variable overriding `max_batch_size`.
pub const ENV_MAX_BATCH_SIZE: &str = "COALESCE_MAX_BATCH_SIZE";

/// Environment variable overriding `max_wait` (milliseconds).
pub const ENV_MAX_WAIT_MS: &str = "COALESCE_MAX_WAIT_MS";

/// Environment variable overriding `cache_size`.
pub const ENV_CACHE_SIZE: &str = "COALESCE_CACHE_SIZE";

/// Configuration for request batching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Number of queued requests that forces a flush.
    pub max_batch_size: Option<usize>,
    /// Maximum time the first request of a batch waits before a flush.
    pub max_wait: Option<Duration>,
    /// Capacity of the result cache. `None` disables caching.
    pub cache_size: Option<usize>,
}

impl BatcherConfig {
    /// Creates an empty configuration. At least one threshold must be set
    /// before it validates.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_batch_size: None,
            max_wait: None,
            cache_size: None,
        }
    }

    /// Sets the size threshold.
    #[must_use]
    pub const fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Sets the wait threshold.
    #[must_use]
    pub const fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    /// Enables the result cache with the given capacity.
    #[must_use]
    pub const fn with_cache_size(mut self, capacity: usize) -> Self {
        self.cache_size = Some(capacity);
        self
    }

    /// Creates a configuration suitable for testing (small batches, short wait).
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_batch_size: Some(3),
            max_wait: Some(Duration::from_millis(200)),
            cache_size: None,
        }
    }

    /// Applies overrides from `COALESCE_*` environment variables on top of
    /// `self`. Unparseable values are ignored.
    #[must_use]
    pub fn from_env(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(size) = lookup(ENV_MAX_BATCH_SIZE).and_then(|v| v.parse().ok()) {
            self.max_batch_size = Some(size);
        }
        if let Some(ms) = lookup(ENV_MAX_WAIT_MS).and_then(|v| v.parse().ok()) {
            self.max_wait = Some(Duration::from_millis(ms));
        }
        if let Some(capacity) = lookup(ENV_CACHE_SIZE).and_then(|v| v.parse().ok()) {
            self.cache_size = Some(capacity);
        }
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::InvalidConfig` if no threshold is set, or if any
    /// configured value is zero.
    pub fn validate(&self) -> BatchResult<()> {
        if self.max_batch_size.is_none() && self.max_wait.is_none() {
            return Err(BatchError::invalid_config(
                "at least one of max_batch_size or max_wait must be set",
            ));
        }

        if self.max_batch_size == Some(0) {
            return Err(BatchError::invalid_config("max_batch_size must be > 0"));
        }

        if self.max_wait.is_some_and(|wait| wait.is_zero()) {
            return Err(BatchError::invalid_config("max_wait must be > 0"));
        }

        if self.cache_size == Some(0) {
            return Err(BatchError::invalid_config("cache_size must be > 0"));
        }

        Ok(())
    }
}
