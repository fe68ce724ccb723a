//! Coalesce - request batching with an optional result cache.
//!
//! Many independent callers submit one key each; the engine groups them into
//! batches, hands every batch to a caller-supplied bulk function in a single
//! call, and resolves each caller with the result at its position.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      BatchingProvider                           │
//! │                                                                 │
//! │  ┌──────────────┐    ┌──────────────────┐    ┌──────────────┐   │
//! │  │ ResultCache  │───▶│   Batcher task   │───▶│   BatchFn    │   │
//! │  │ (optional)   │    │ (size | deadline)│    │  (spawned)   │   │
//! │  └──────────────┘    └──────────────────┘    └──────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A batch is flushed when the queue reaches `max_batch_size` or when
//! `max_wait` has elapsed since its first request, whichever comes first. At
//! least one of the two must be configured.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use coalesce::{compute_fn, create_batcher, BatcherConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), coalesce::BatchError> {
//! let lengths = compute_fn(|words: Vec<String>| async move {
//!     Ok::<_, String>(words.iter().map(String::len).collect::<Vec<_>>())
//! });
//! let config = BatcherConfig::new()
//!     .with_max_batch_size(2)
//!     .with_max_wait(Duration::from_millis(10))
//!     .with_cache_size(128);
//! let batcher = create_batcher(lengths, &config)?;
//!
//! let (a, b) = (batcher.submit("batch".to_string()), batcher.submit("lru".to_string()));
//! assert_eq!(a.await?, 5);
//! assert_eq!(b.await?, 3);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod batch_fn;
pub mod cache;
pub mod caching;
pub mod config;
pub mod engine;
pub mod error;
pub mod provider;

// Re-export main types for convenience.
pub use batch_fn::{compute_fn, BatchFn, ComputeFn};
pub use cache::ResultCache;
pub use caching::CachingBatcher;
pub use config::BatcherConfig;
pub use engine::{BatchFuture, Batcher};
pub use error::{BatchError, BatchResult};
pub use provider::{create_batcher, BatchingProvider, Provider};
