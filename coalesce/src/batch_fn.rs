//! Batch function abstraction.
//!
//! The engine hands every flushed batch to a [`BatchFn`]. Implementations must
//! be length- and position-preserving: result `i` belongs to key `i`.

use std::fmt::Display;
use std::future::Future;

use async_trait::async_trait;

/// Bulk computation invoked once per flushed batch.
///
/// # Implementation Notes
///
/// Implementations must be `Send + Sync` since the engine runs each batch on
/// its own task, and several batches may be in flight at once.
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync + 'static
where
    K: Send + 'static,
    V: Send + 'static,
{
    /// Error returned by the batch function. Its `Display` output is delivered
    /// to every caller of the failed batch.
    type Error: Display + Send + 'static;

    /// Computes one result per key, in key order.
    ///
    /// # Errors
    ///
    /// Any error fails the whole batch.
    async fn compute(&self, keys: Vec<K>) -> Result<Vec<V>, Self::Error>;
}

/// Adapter returned by [`compute_fn`].
#[derive(Clone, Copy)]
pub struct ComputeFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for ComputeFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeFn").finish_non_exhaustive()
    }
}

/// Wraps a closure returning a future into a [`BatchFn`].
///
/// Synchronous computations can return `std::future::ready(...)` or use an
/// `async move` block.
///
/// # Example
///
/// ```
/// use coalesce::compute_fn;
///
/// let double = compute_fn(|keys: Vec<u64>| async move {
///     Ok::<_, std::convert::Infallible>(keys.into_iter().map(|k| k * 2).collect::<Vec<u64>>())
/// });
/// # let _ = double;
/// ```
pub const fn compute_fn<F>(f: F) -> ComputeFn<F> {
    ComputeFn { f }
}

#[async_trait]
impl<K, V, E, F, Fut> BatchFn<K, V> for ComputeFn<F>
where
    K: Send + 'static,
    V: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
{
    type Error = E;

    async fn compute(&self, keys: Vec<K>) -> Result<Vec<V>, E> {
        (self.f)(keys).await
    }
}
