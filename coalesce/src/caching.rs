//! Caching decorator.
//!
//! Consults a [`ResultCache`] before delegating to the wrapped provider. Hits
//! resolve immediately; misses go through the provider and the successful
//! result is cached as soon as it resolves, whether or not the caller is still
//! waiting. Errors are never cached.
//!
//! Concurrent misses for the same key are not coalesced: each one delegates
//! independently and the last result written wins.

use std::hash::Hash;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::trace;

use crate::cache::ResultCache;
use crate::engine::Batcher;
use crate::error::{BatchError, BatchResult};
use crate::provider::Provider;

/// Provider wrapper that short-circuits cached keys.
pub struct CachingBatcher<K: Hash + Eq, V, P = Batcher<K, V>> {
    inner: P,
    cache: Arc<ResultCache<K, V>>,
}

impl<K: Hash + Eq, V, P: Clone> Clone for CachingBatcher<K, V, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<K: Hash + Eq, V, P: std::fmt::Debug> std::fmt::Debug for CachingBatcher<K, V, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingBatcher")
            .field("inner", &self.inner)
            .field("cache", &self.cache)
            .finish()
    }
}

impl<K, V, P> CachingBatcher<K, V, P>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    P: Provider<K, V>,
{
    /// Wraps `inner` with `cache`.
    #[must_use]
    pub fn new(inner: P, cache: ResultCache<K, V>) -> Self {
        Self {
            inner,
            cache: Arc::new(cache),
        }
    }

    #[cfg(test)]
    pub(crate) const fn cache(&self) -> &Arc<ResultCache<K, V>> {
        &self.cache
    }

    /// Resolves `key` from the cache, or delegates and caches the result.
    pub fn submit(&self, key: K) -> BoxFuture<'static, BatchResult<V>> {
        if let Some(value) = self.cache.get(&key) {
            trace!("cache hit");
            return Box::pin(std::future::ready(Ok(value)));
        }

        // Delegate now so the request joins the current batch even if the
        // returned future is polled late.
        let pending = self.inner.submit(key.clone());
        let cache = Arc::clone(&self.cache);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // No runtime to drive the insert; the caller's future does it.
            return Box::pin(async move {
                let value = pending.await?;
                store(&cache, key, &value);
                Ok(value)
            });
        };

        // The insert runs on its own task so an abandoned caller future
        // still populates the cache.
        let (result_tx, result_rx) = oneshot::channel();
        runtime.spawn(async move {
            let result = pending.await;
            if let Ok(value) = &result {
                store(&cache, key, value);
            }
            // Caller may have stopped waiting.
            let _ = result_tx.send(result);
        });

        Box::pin(async move { result_rx.await.unwrap_or(Err(BatchError::Shutdown)) })
    }

    /// Shuts down the wrapped provider.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

fn store<K: Hash + Eq, V: Clone>(cache: &ResultCache<K, V>, key: K, value: &V) {
    if cache.insert(key, value.clone()) {
        trace!("cache evicted least recently used entry");
    }
}

impl<K, V, P> Provider<K, V> for CachingBatcher<K, V, P>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    P: Provider<K, V>,
{
    fn submit(&self, key: K) -> BoxFuture<'static, BatchResult<V>> {
        Self::submit(self, key)
    }

    fn shutdown(&self) {
        Self::shutdown(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;
    use parking_lot::Mutex;

    /// Provider resolving every key to `key * 10` and recording what it saw.
    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Vec<u32>>,
        fail: bool,
    }

    impl Provider<u32, u32> for Arc<RecordingProvider> {
        fn submit(&self, key: u32) -> BoxFuture<'static, BatchResult<u32>> {
            self.seen.lock().push(key);
            let result = if self.fail {
                Err(BatchError::Computation {
                    message: "down".to_string(),
                })
            } else {
                Ok(key * 10)
            };
            Box::pin(std::future::ready(result))
        }

        fn shutdown(&self) {}
    }

    fn caching(
        capacity: usize,
        fail: bool,
    ) -> (
        CachingBatcher<u32, u32, Arc<RecordingProvider>>,
        Arc<RecordingProvider>,
    ) {
        let provider = Arc::new(RecordingProvider {
            fail,
            ..Default::default()
        });
        let cache = ResultCache::with_capacity(capacity).unwrap();
        (CachingBatcher::new(Arc::clone(&provider), cache), provider)
    }

    #[tokio::test]
    async fn test_miss_delegates_once_and_populates() {
        let (batcher, provider) = caching(4, false);

        assert_eq!(batcher.submit(1).await.unwrap(), 10);
        assert_eq!(*provider.seen.lock(), vec![1]);
        assert!(batcher.cache().contains(&1));
    }

    #[tokio::test]
    async fn test_hit_never_reaches_provider() {
        let (batcher, provider) = caching(4, false);

        batcher.submit(1).await.unwrap();
        assert_eq!(batcher.submit(1).await.unwrap(), 10);
        assert_eq!(batcher.submit(1).await.unwrap(), 10);

        assert_eq!(*provider.seen.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_concurrent_misses_each_delegate() {
        let (batcher, provider) = caching(4, false);

        let first = batcher.submit(5);
        let second = batcher.submit(5);
        assert_eq!(first.await.unwrap(), 50);
        assert_eq!(second.await.unwrap(), 50);

        assert_eq!(*provider.seen.lock(), vec![5, 5]);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (batcher, provider) = caching(4, true);

        assert!(batcher.submit(1).await.is_err());
        assert!(batcher.submit(1).await.is_err());

        assert!(batcher.cache().is_empty());
        assert_eq!(*provider.seen.lock(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_abandoned_miss_still_populates() {
        let (batcher, provider) = caching(4, false);

        drop(batcher.submit(7));
        for _ in 0..10 {
            if batcher.cache().contains(&7) {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(batcher.cache().contains(&7));
        assert_eq!(batcher.submit(7).await.unwrap(), 70);
        assert_eq!(*provider.seen.lock(), vec![7]);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let (batcher, provider) = caching(2, false);

        batcher.submit(1).await.unwrap();
        batcher.submit(2).await.unwrap();
        batcher.submit(3).await.unwrap();

        assert!(!batcher.cache().contains(&1));
        assert_eq!(batcher.cache().len(), 2);

        // Key 1 was evicted, so it is delegated again.
        batcher.submit(1).await.unwrap();
        assert_eq!(*provider.seen.lock(), vec![1, 2, 3, 1]);
    }
}
