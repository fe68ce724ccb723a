//! Request batching engine.
//!
//! Callers submit keys one at a time; the engine accumulates them and hands
//! each batch to a [`BatchFn`] in a single call.
//!
//! # Design
//!
//! ```text
//! submit(k1) ──┐
//! submit(k2) ──┼──> mpsc ──> engine task ──> BatchFn::compute([k1, k2, k3]) ──> Notify All
//! submit(k3) ──┘            (max_wait)
//! ```
//!
//! Every submission travels through one unbounded channel to a single engine
//! task, so queue mutations, deadline arm/cancel and flush decisions are
//! totally ordered. The engine accumulates requests until either:
//! - the deadline armed by the first queued request expires (`max_wait`)
//! - the queue reaches `max_batch_size`
//!
//! The queue is then swapped out and the batch function runs on its own task,
//! so the engine keeps accepting submissions (and may flush further batches)
//! while earlier batches are still computing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batch_fn::BatchFn;
use crate::config::BatcherConfig;
use crate::error::{BatchError, BatchResult};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum FlushReason {
    Deadline,
    Size,
    Shutdown,
}

impl FlushReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Deadline => "deadline",
            Self::Size => "size",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A pending request waiting to be batched.
struct PendingRequest<K, V> {
    /// Key handed to the batch function.
    key: K,
    /// Channel to send the result when the batch completes.
    result_tx: oneshot::Sender<BatchResult<V>>,
}

impl<K, V> PendingRequest<K, V> {
    fn reject(self, err: BatchError) {
        // The caller may have stopped waiting.
        let _ = self.result_tx.send(Err(err));
    }
}

/// Message sent to the engine task.
enum BatcherMessage<K, V> {
    /// Submit a new request to be batched.
    Submit(PendingRequest<K, V>),
    /// Shutdown the engine.
    Shutdown,
}

/// Future resolving to the result of one submitted key.
///
/// Dropping it is safe: the request still runs with its batch and the result
/// is discarded.
#[must_use = "futures do nothing unless awaited"]
pub struct BatchFuture<V> {
    rx: oneshot::Receiver<BatchResult<V>>,
}

impl<V> Future for BatchFuture<V> {
    type Output = BatchResult<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the engine went away without answering.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BatchError::Shutdown)))
    }
}

impl<V> std::fmt::Debug for BatchFuture<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchFuture").finish_non_exhaustive()
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for submitting requests to the engine.
///
/// Clones share the same engine. The engine stops when [`Batcher::shutdown`]
/// is called or when the last handle is dropped; requests still queued at that
/// point fail with [`BatchError::Shutdown`].
pub struct Batcher<K, V> {
    tx: mpsc::UnboundedSender<BatcherMessage<K, V>>,
}

impl<K, V> Clone for Batcher<K, V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for Batcher<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<K, V> Batcher<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    /// Validates `config` and spawns the engine task on the current tokio
    /// runtime.
    ///
    /// `config.cache_size` is ignored here; see
    /// [`create_batcher`](crate::create_batcher) for the cached variant.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::InvalidConfig` if the thresholds are invalid or if
    /// called outside a tokio runtime.
    pub fn spawn<B>(batch_fn: B, config: &BatcherConfig) -> BatchResult<Self>
    where
        B: BatchFn<K, V>,
    {
        config.validate()?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            BatchError::invalid_config("batcher must be created inside a tokio runtime")
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let engine = BatchEngine {
            batch_fn: Arc::new(batch_fn),
            max_batch_size: config.max_batch_size,
            max_wait: config.max_wait,
            queue: Vec::new(),
            first_request_at: Instant::now(),
            deadline: None,
        };
        runtime.spawn(engine.run(rx));

        Ok(Self { tx })
    }

    /// Submits a key for batching.
    ///
    /// Never blocks. Submissions after shutdown resolve immediately with
    /// `BatchError::Shutdown`.
    pub fn submit(&self, key: K) -> BatchFuture<V> {
        let (result_tx, rx) = oneshot::channel();
        let request = PendingRequest { key, result_tx };

        if let Err(mpsc::error::SendError(BatcherMessage::Submit(request))) =
            self.tx.send(BatcherMessage::Submit(request))
        {
            request.reject(BatchError::Shutdown);
        }

        BatchFuture { rx }
    }

    /// Stops the engine. Queued requests fail with `BatchError::Shutdown`;
    /// batches already handed to the batch function complete normally.
    pub fn shutdown(&self) {
        // Already gone if the send fails.
        let _ = self.tx.send(BatcherMessage::Shutdown);
    }
}

// =============================================================================
// Engine Task
// =============================================================================

/// State owned by the engine task. Nothing else touches the queue or the
/// deadline.
struct BatchEngine<K, V, B> {
    batch_fn: Arc<B>,
    max_batch_size: Option<usize>,
    max_wait: Option<Duration>,
    /// Requests in arrival order.
    queue: Vec<PendingRequest<K, V>>,
    /// Time when the first request of the current batch was queued.
    first_request_at: Instant,
    /// Armed when the queue goes from empty to non-empty and `max_wait` is set.
    deadline: Option<Instant>,
}

impl<K, V, B> BatchEngine<K, V, B>
where
    K: Send + 'static,
    V: Send + 'static,
    B: BatchFn<K, V>,
{
    /// Runs until shutdown or until every handle is dropped.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BatcherMessage<K, V>>) {
        info!(
            max_batch_size = ?self.max_batch_size,
            max_wait_ms = ?self.max_wait.map(|wait| wait.as_millis()),
            "Batcher task started"
        );

        loop {
            let deadline = self.deadline;

            tokio::select! {
                // Receive new request or shutdown.
                msg = rx.recv() => {
                    match msg {
                        Some(BatcherMessage::Submit(request)) => self.handle_submit(request),
                        Some(BatcherMessage::Shutdown) | None => {
                            self.reject_pending(&mut rx);
                            info!("Batcher task shutting down");
                            break;
                        }
                    }
                }
                // Deadline for the current batch.
                () = async {
                    if let Some(deadline) = deadline {
                        tokio::time::sleep_until(deadline).await;
                    } else {
                        // Nothing queued, wait for the next message.
                        std::future::pending::<()>().await;
                    }
                } => {
                    self.flush(FlushReason::Deadline);
                }
            }
        }
    }

    /// Queues a request, arming the deadline or flushing on size as needed.
    fn handle_submit(&mut self, request: PendingRequest<K, V>) {
        if self.queue.is_empty() {
            self.first_request_at = Instant::now();
            self.deadline = self.max_wait.map(|wait| self.first_request_at + wait);
        }

        self.queue.push(request);

        if self
            .max_batch_size
            .is_some_and(|max| self.queue.len() >= max)
        {
            self.flush(FlushReason::Size);
        }
    }

    /// Swaps out the queue and dispatches it to the batch function.
    #[tracing::instrument(
        skip_all,
        name = "batcher_flush",
        fields(reason = reason.as_str(), batch_size = self.queue.len())
    )]
    fn flush(&mut self, reason: FlushReason) {
        self.deadline = None;

        // A deadline can only outlive its batch if the queue was already drained.
        if self.queue.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.queue);
        let batch_size = batch.len();

        // Safety: durations will never exceed u64::MAX microseconds.
        #[allow(clippy::cast_possible_truncation)]
        let batch_age_us = self.first_request_at.elapsed().as_micros() as u64;

        debug!(
            reason = reason.as_str(),
            batch_size,
            batch_age_us,
            "Batch flush"
        );

        let (keys, result_txs): (Vec<K>, Vec<_>) = batch
            .into_iter()
            .map(|request| (request.key, request.result_tx))
            .unzip();

        tokio::spawn(run_batch(Arc::clone(&self.batch_fn), keys, result_txs));
    }

    /// Fails everything still queued, including submissions that raced the
    /// shutdown message into the channel.
    fn reject_pending(&mut self, rx: &mut mpsc::UnboundedReceiver<BatcherMessage<K, V>>) {
        self.deadline = None;
        rx.close();

        let mut rejected = 0usize;
        for request in self.queue.drain(..) {
            request.reject(BatchError::Shutdown);
            rejected += 1;
        }
        while let Ok(msg) = rx.try_recv() {
            if let BatcherMessage::Submit(request) = msg {
                request.reject(BatchError::Shutdown);
                rejected += 1;
            }
        }

        if rejected > 0 {
            warn!(
                reason = FlushReason::Shutdown.as_str(),
                rejected,
                "Batcher rejecting pending requests"
            );
        }
    }
}

/// Runs one batch and notifies every waiter by position.
///
/// The batch function runs on its own task so a panic fails only this batch.
async fn run_batch<K, V, B>(
    batch_fn: Arc<B>,
    keys: Vec<K>,
    result_txs: Vec<oneshot::Sender<BatchResult<V>>>,
) where
    K: Send + 'static,
    V: Send + 'static,
    B: BatchFn<K, V>,
{
    let expected = keys.len();

    let outcome = tokio::spawn(async move {
        batch_fn
            .compute(keys)
            .await
            .map_err(|e| e.to_string())
    })
    .await;

    let err = match outcome {
        Ok(Ok(values)) if values.len() == expected => {
            for (result_tx, value) in result_txs.into_iter().zip(values) {
                // Ignore send errors - caller stopped waiting.
                let _ = result_tx.send(Ok(value));
            }
            return;
        }
        Ok(Ok(values)) => BatchError::ResultCountMismatch {
            expected,
            actual: values.len(),
        },
        Ok(Err(message)) => BatchError::Computation { message },
        Err(join_err) => BatchError::Computation {
            message: if join_err.is_panic() {
                "batch function panicked".to_string()
            } else {
                "batch function was cancelled".to_string()
            },
        },
    };

    warn!(batch_size = expected, error = %err, "Batch failed");

    for result_tx in result_txs {
        let _ = result_tx.send(Err(err.clone()));
    }
}
