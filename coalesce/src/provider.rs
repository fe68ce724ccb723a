//! Batching provider facade.
//!
//! [`create_batcher`] validates the configuration, spawns the engine and,
//! when `cache_size` is set, wraps it in the caching decorator. Callers only
//! ever see [`BatchingProvider::submit`] (plus `shutdown` for disposal).

use std::hash::Hash;

use futures::future::BoxFuture;
use tracing::info;

use crate::batch_fn::BatchFn;
use crate::cache::ResultCache;
use crate::caching::CachingBatcher;
use crate::config::BatcherConfig;
use crate::engine::Batcher;
use crate::error::BatchResult;

/// Anything that resolves submitted keys to values.
///
/// Implemented by the bare engine, the caching decorator and the facade, so
/// the decorator can wrap any of them.
pub trait Provider<K, V>: Send + Sync {
    /// Submits a key. Returns immediately; the future resolves once the
    /// key's batch completes.
    fn submit(&self, key: K) -> BoxFuture<'static, BatchResult<V>>;

    /// Disposes of the provider. Pending and later submissions fail with
    /// `BatchError::Shutdown`.
    fn shutdown(&self);
}

impl<K, V> Provider<K, V> for Batcher<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    fn submit(&self, key: K) -> BoxFuture<'static, BatchResult<V>> {
        Box::pin(Self::submit(self, key))
    }

    fn shutdown(&self) {
        Self::shutdown(self);
    }
}

/// Provider returned by [`create_batcher`].
pub enum BatchingProvider<K: Hash + Eq, V> {
    /// Requests go straight to the engine.
    Direct(Batcher<K, V>),
    /// Requests consult the result cache first.
    Cached(CachingBatcher<K, V>),
}

impl<K: Hash + Eq, V> Clone for BatchingProvider<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(batcher) => Self::Direct(batcher.clone()),
            Self::Cached(batcher) => Self::Cached(batcher.clone()),
        }
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for BatchingProvider<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(batcher) => f.debug_tuple("Direct").field(batcher).finish(),
            Self::Cached(batcher) => f.debug_tuple("Cached").field(batcher).finish(),
        }
    }
}

impl<K, V> BatchingProvider<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Submits a key for batching.
    pub fn submit(&self, key: K) -> BoxFuture<'static, BatchResult<V>> {
        match self {
            Self::Direct(batcher) => Box::pin(batcher.submit(key)),
            Self::Cached(batcher) => batcher.submit(key),
        }
    }

    /// Shuts down the underlying engine.
    pub fn shutdown(&self) {
        match self {
            Self::Direct(batcher) => batcher.shutdown(),
            Self::Cached(batcher) => batcher.shutdown(),
        }
    }

    #[cfg(test)]
    pub(crate) const fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

impl<K, V> Provider<K, V> for BatchingProvider<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn submit(&self, key: K) -> BoxFuture<'static, BatchResult<V>> {
        Self::submit(self, key)
    }

    fn shutdown(&self) {
        Self::shutdown(self);
    }
}

/// Creates a batching provider.
///
/// Must be called inside a tokio runtime; the engine runs as a spawned task.
///
/// # Errors
///
/// Returns `BatchError::InvalidConfig` if neither threshold is set, if any
/// configured value is zero, or if no tokio runtime is available.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use coalesce::{compute_fn, create_batcher, BatcherConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), coalesce::BatchError> {
/// let double = compute_fn(|keys: Vec<u64>| async move {
///     Ok::<_, String>(keys.into_iter().map(|k| k * 2).collect::<Vec<_>>())
/// });
/// let config = BatcherConfig::new()
///     .with_max_batch_size(3)
///     .with_max_wait(Duration::from_millis(200));
/// let batcher = create_batcher(double, &config)?;
///
/// assert_eq!(batcher.submit(21).await?, 42);
/// # Ok(())
/// # }
/// ```
pub fn create_batcher<K, V, B>(
    batch_fn: B,
    config: &BatcherConfig,
) -> BatchResult<BatchingProvider<K, V>>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    B: BatchFn<K, V>,
{
    // Validate everything, cache included, before the engine is spawned.
    config.validate()?;
    let cache = config.cache_size.map(ResultCache::with_capacity).transpose()?;

    let batcher = Batcher::spawn(batch_fn, config)?;

    info!(
        max_batch_size = ?config.max_batch_size,
        max_wait_ms = ?config.max_wait.map(|wait| wait.as_millis()),
        cache_size = ?config.cache_size,
        "Created batching provider"
    );

    Ok(match cache {
        Some(cache) => BatchingProvider::Cached(CachingBatcher::new(batcher, cache)),
        None => BatchingProvider::Direct(batcher),
    })
}
