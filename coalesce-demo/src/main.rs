//! Coalesce demo binary.
//!
//! Walks through the batching scenarios with a doubling batch function:
//!
//! ```bash
//! # 2 keys, below the size threshold: resolves after max_wait.
//! coalesce-demo --scenario partial
//!
//! # 12 keys with max_batch_size=3: four size-triggered batches.
//! coalesce-demo --scenario burst
//!
//! # Repeated keys served from the cache.
//! coalesce-demo --scenario cached --cache-size 16
//! ```
//!
//! Thresholds default to `max_batch_size=3`, `max_wait=200ms`, can be
//! overridden with `COALESCE_*` environment variables, and finally with the
//! command-line flags below.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use coalesce::{compute_fn, create_batcher, BatchFn, BatcherConfig, BatchingProvider};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Scenario to run.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Scenario {
    /// Two keys that flush on the deadline.
    Partial,
    /// Twelve keys that flush on size.
    Burst,
    /// Repeated keys through the result cache.
    Cached,
    /// Every scenario in order.
    #[default]
    All,
}

/// Coalesce batching demo.
#[derive(Parser, Debug)]
#[command(name = "coalesce-demo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario to run.
    #[arg(long, value_enum, default_value = "all")]
    scenario: Scenario,

    /// Flush once this many requests are queued.
    #[arg(long)]
    max_batch_size: Option<usize>,

    /// Flush once the first queued request has waited this long (milliseconds).
    #[arg(long)]
    max_wait_ms: Option<u64>,

    /// Capacity of the result cache. Omit to disable caching.
    #[arg(long)]
    cache_size: Option<usize>,

    /// Simulated latency of the batch function (milliseconds).
    #[arg(long, default_value = "0")]
    compute_latency_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

impl Args {
    /// Builds the batcher configuration: defaults, then environment, then flags.
    fn config(&self) -> BatcherConfig {
        let mut config = BatcherConfig::for_testing().from_env();
        if let Some(size) = self.max_batch_size {
            config.max_batch_size = Some(size);
        }
        if let Some(ms) = self.max_wait_ms {
            config.max_wait = Some(Duration::from_millis(ms));
        }
        if let Some(capacity) = self.cache_size {
            config.cache_size = Some(capacity);
        }
        config
    }
}

/// Doubles every key, counting how many keys actually reached it.
fn doubling(latency: Duration, computed: Arc<AtomicUsize>) -> impl BatchFn<u64, u64> {
    compute_fn(move |keys: Vec<u64>| {
        computed.fetch_add(keys.len(), Ordering::Relaxed);
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            Ok::<_, String>(keys.into_iter().map(|k| k * 2).collect::<Vec<_>>())
        }
    })
}

/// Submits every key concurrently and logs the results.
async fn run_keys(
    name: &str,
    batcher: &BatchingProvider<u64, u64>,
    keys: &[u64],
) -> Result<(), coalesce::BatchError> {
    let start = Instant::now();
    let results = join_all(keys.iter().map(|&k| batcher.submit(k))).await;
    let elapsed = start.elapsed();

    let values = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    // Safety: durations will never exceed u64::MAX milliseconds.
    #[allow(clippy::cast_possible_truncation)]
    let elapsed_ms = elapsed.as_millis() as u64;
    info!(
        scenario = name,
        ?keys,
        ?values,
        elapsed_ms,
        "Scenario resolved"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = args.config();
    info!(
        scenario = ?args.scenario,
        max_batch_size = ?config.max_batch_size,
        max_wait_ms = ?config.max_wait.map(|wait| wait.as_millis()),
        cache_size = ?config.cache_size,
        "Starting coalesce demo"
    );

    let computed = Arc::new(AtomicUsize::new(0));
    let latency = Duration::from_millis(args.compute_latency_ms);
    let batcher = create_batcher(doubling(latency, Arc::clone(&computed)), &config)?;

    if matches!(args.scenario, Scenario::Partial | Scenario::All) {
        run_keys("partial", &batcher, &[4, 5]).await?;
    }

    if matches!(args.scenario, Scenario::Burst | Scenario::All) {
        let keys: Vec<u64> = (1..=12).collect();
        run_keys("burst", &batcher, &keys).await?;
    }

    if matches!(args.scenario, Scenario::Cached | Scenario::All) {
        if config.cache_size.is_none() {
            info!("Result cache disabled, pass --cache-size to serve repeats from cache");
        }
        run_keys("cached-first", &batcher, &[7, 8, 9]).await?;
        run_keys("cached-repeat", &batcher, &[7, 8, 9]).await?;
    }

    info!(
        keys_computed = computed.load(Ordering::Relaxed),
        "Demo finished"
    );
    batcher.shutdown();
    Ok(())
}
