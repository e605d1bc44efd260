//! # Benchmark Engine Module
//!
//! This module contains the engine that drives a [`Flow`] a fixed number of
//! times across a pool of concurrent workers and routes every measurement to
//! the loaded consumers.
//!
//! ## Key Components
//!
//! - **Benchmark**: Orchestrator owning the run parameters and the consumer registry
//! - **BenchmarkConfig**: Resolved and validated run configuration
//! - **Flow**: The user workload, executed once per iteration
//! - **Worker pool**: `concurrency` tasks pulling iteration tokens until all are taken
//!
//! ## Run Lifecycle
//!
//! 1. **Validation**: Reject invalid parameters before anything starts
//! 2. **Setup**: Create the measurement channel, one client per worker, start
//!    the loaded consumers and connect them to the collector
//! 3. **Execution**: Launch the workers; exactly `iterations` tokens are handed out
//! 4. **Drain**: Once every execution completed, close the measurement stream
//!    and wait for the fan-out to deliver everything
//! 5. **Finalize**: Finalize consumers with the elapsed wall-clock time
//!
//! ## Failure Policy
//!
//! A flow error is fatal for the run. The engine stops every worker and
//! consumer task and returns [`HarnessError::Workload`] without finalizing
//! any consumer, so no report is produced from a partial stream.

use crate::{
    cli::Args,
    client::BenchClient,
    collector::MeasurementCollector,
    consumer::ConsumerRegistry,
    error::{HarnessError, Result},
    results::RunSummary,
    utils,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// User workload executed once per iteration.
///
/// Implementations must be safe to call concurrently from different workers;
/// each call receives the calling worker's own [`BenchClient`].
#[async_trait]
pub trait Flow: Send + Sync {
    /// Called once before any worker starts. A failure here is reported as a
    /// configuration error and nothing is run.
    async fn initialize(&self, _params: &RunParameters) -> anyhow::Result<()> {
        Ok(())
    }

    /// Execute one iteration of the workload.
    async fn run_flow(&self, client: &BenchClient) -> anyhow::Result<()>;
}

/// Parameters fixed for the duration of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParameters {
    pub iterations: usize,
    pub concurrency: usize,
    pub keep_alive: bool,
}

/// Configuration for benchmark execution
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    /// Total number of flow executions
    pub iterations: usize,

    /// Number of concurrent workers
    pub concurrency: usize,

    /// Whether workers reuse TCP connections between requests
    ///
    /// Disabling it forces a new connection per request, which measures
    /// connection setup cost instead of steady-state throughput.
    pub keep_alive: bool,

    /// Capacity of the measurement channel and of each consumer input
    ///
    /// `None` sizes the buffers from the iteration count.
    pub buffer_size: Option<usize>,
}

impl BenchmarkConfig {
    pub fn new(iterations: usize, concurrency: usize) -> Self {
        Self {
            iterations,
            concurrency,
            keep_alive: crate::defaults::KEEP_ALIVE,
            buffer_size: None,
        }
    }

    /// Create benchmark configuration from CLI arguments
    pub fn from_args(args: &Args) -> Self {
        Self {
            iterations: args.iterations,
            concurrency: args.concurrency,
            keep_alive: args.keep_alive,
            buffer_size: args.buffer_size,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Reject parameters that could never complete a run.
    pub fn validate(&self) -> Result<()> {
        utils::validate_concurrency(self.concurrency)
            .map_err(|e| HarnessError::Configuration(e.to_string()))?;
        if let Some(buffer_size) = self.buffer_size {
            utils::validate_buffer_size(buffer_size)
                .map_err(|e| HarnessError::Configuration(e.to_string()))?;
        }
        Ok(())
    }

    pub fn channel_capacity(&self) -> usize {
        self.buffer_size
            .unwrap_or_else(|| crate::defaults::channel_capacity(self.iterations))
    }

    pub fn parameters(&self) -> RunParameters {
        RunParameters {
            iterations: self.iterations,
            concurrency: self.concurrency,
            keep_alive: self.keep_alive,
        }
    }
}

/// A helper struct to display the run configuration in one place.
struct RunDisplay<'a> {
    config: &'a BenchmarkConfig,
    consumers: &'a [&'a str],
}

impl<'a> std::fmt::Display for RunDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer_size_str = if self.config.buffer_size.is_some() {
            format!("{} (User-provided)", self.config.channel_capacity())
        } else {
            format!("{} (Automatic)", self.config.channel_capacity())
        };
        let consumers_str = if self.consumers.is_empty() {
            "none".to_string()
        } else {
            self.consumers.join(", ")
        };

        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(f, "Starting Benchmark")?;
        writeln!(f, "  Iterations:         {}", self.config.iterations)?;
        writeln!(f, "  Concurrency:        {}", self.config.concurrency)?;
        writeln!(f, "  Keep-Alive:         {}", self.config.keep_alive)?;
        writeln!(f, "  Buffer Size:        {}", buffer_size_str)?;
        writeln!(f, "  Consumers:          {}", consumers_str)?;
        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// Hands out exactly `total` iteration indexes across all workers.
struct IterationTokens {
    issued: AtomicUsize,
    total: usize,
}

impl IterationTokens {
    fn new(total: usize) -> Self {
        Self {
            issued: AtomicUsize::new(0),
            total,
        }
    }

    /// The next iteration index, or `None` once all have been handed out.
    fn next(&self) -> Option<usize> {
        let index = self.issued.fetch_add(1, Ordering::Relaxed);
        (index < self.total).then_some(index)
    }
}

/// Counts down once per finished execution; waiters wake when it reaches zero.
struct Completion {
    remaining: AtomicUsize,
    notify: Notify,
}

impl Completion {
    fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            notify: Notify::new(),
        }
    }

    fn done(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }

    fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Benchmark engine
///
/// Owns the validated configuration and the consumer registry for the lifetime
/// of the process. [`Benchmark::run`] may be called more than once; each run
/// gets fresh channels and a fresh set of active consumers.
pub struct Benchmark {
    config: BenchmarkConfig,
    registry: ConsumerRegistry,
}

impl Benchmark {
    /// Create a benchmark, rejecting invalid configuration up front.
    pub fn new(config: BenchmarkConfig, registry: ConsumerRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    /// Execute the flow `iterations` times and finalize the loaded consumers.
    pub async fn run(&self, flow: Arc<dyn Flow>) -> Result<RunSummary> {
        let params = self.config.parameters();
        let capacity = self.config.channel_capacity();

        flow.initialize(&params)
            .await
            .map_err(|e| HarnessError::Configuration(format!("flow initialization failed: {:#}", e)))?;

        // The only strong sender. Collectors, clients and open measurements
        // hold weak handles, so dropping `sink` always closes the stream.
        let (sink, output) = mpsc::channel(capacity.max(1));
        let collector = MeasurementCollector::new(&sink);
        let clients = (0..params.concurrency)
            .map(|_| BenchClient::new(collector.clone(), params.keep_alive))
            .collect::<Result<Vec<_>>>()?;

        let active = self
            .registry
            .initialize_with_capacity(params.iterations, params.concurrency, capacity);
        info!(
            "{}",
            RunDisplay {
                config: &self.config,
                consumers: &active.names(),
            }
        );
        let mut fan_out = active.pipe(output);

        let started_at = chrono::Utc::now();
        let start = Instant::now();

        let tokens = Arc::new(IterationTokens::new(params.iterations));
        let completion = Arc::new(Completion::new(params.iterations));
        let mut workers = JoinSet::new();
        for (worker_id, client) in clients.into_iter().enumerate() {
            workers.spawn(run_worker(
                worker_id,
                client,
                Arc::clone(&flow),
                Arc::clone(&tokens),
                Arc::clone(&completion),
            ));
        }

        let mut executed = 0;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(|e| HarnessError::WorkerPanicked(e.to_string()));
            match outcome.and_then(|worker_result| worker_result) {
                Ok(count) => executed += count,
                Err(e) => {
                    error!("Aborting run: {}", e);
                    workers.abort_all();
                    fan_out.abort();
                    return Err(e);
                }
            }
        }
        completion.wait().await;
        let elapsed = start.elapsed();

        // Windows still open in the flow are discarded from here on.
        drop(sink);

        let delivered = fan_out.drained().await?;
        debug!("Fan-out drained {} measurements", delivered);

        fan_out.finalize(elapsed).await?;

        let summary = RunSummary::new(params, executed, delivered, started_at, elapsed);
        info!(
            "Benchmark completed: {} iterations, {} measurements in {}",
            summary.executed,
            summary.measurements,
            utils::format_duration(elapsed)
        );
        Ok(summary)
    }
}

/// Pull iteration tokens until none are left, executing the flow once per token.
async fn run_worker(
    worker_id: usize,
    client: BenchClient,
    flow: Arc<dyn Flow>,
    tokens: Arc<IterationTokens>,
    completion: Arc<Completion>,
) -> Result<usize> {
    let mut executed = 0;

    while let Some(iteration) = tokens.next() {
        flow.run_flow(&client)
            .await
            .map_err(|e| HarnessError::workload(iteration, worker_id, e))?;
        completion.done();
        executed += 1;
    }

    debug!("Worker {} finished after {} executions", worker_id, executed);
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_config_creation() {
        let config = BenchmarkConfig::new(1000, 10)
            .with_keep_alive(false)
            .with_buffer_size(128);

        assert_eq!(config.iterations, 1000);
        assert_eq!(config.concurrency, 10);
        assert!(!config.keep_alive);
        assert_eq!(config.channel_capacity(), 128);
        assert_eq!(
            config.parameters(),
            RunParameters {
                iterations: 1000,
                concurrency: 10,
                keep_alive: false,
            }
        );
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = BenchmarkConfig::new(10, 0).validate().unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)));

        let err = Benchmark::new(BenchmarkConfig::new(0, 0), ConsumerRegistry::new())
            .err()
            .unwrap();
        assert!(matches!(err, HarnessError::Configuration(_)));
    }

    #[test]
    fn test_zero_buffer_size_is_rejected() {
        let err = BenchmarkConfig::new(10, 1)
            .with_buffer_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)));
    }

    #[test]
    fn test_automatic_channel_capacity() {
        assert_eq!(BenchmarkConfig::new(0, 1).channel_capacity(), 1);
        assert_eq!(BenchmarkConfig::new(500, 1).channel_capacity(), 500);
        assert_eq!(
            BenchmarkConfig::new(10_000_000, 1).channel_capacity(),
            crate::defaults::MAX_CHANNEL_CAPACITY
        );
    }

    #[test]
    fn test_iteration_tokens_are_exhausted_exactly() {
        let tokens = IterationTokens::new(3);
        assert_eq!(tokens.next(), Some(0));
        assert_eq!(tokens.next(), Some(1));
        assert_eq!(tokens.next(), Some(2));
        assert_eq!(tokens.next(), None);
        assert_eq!(tokens.next(), None);

        assert_eq!(IterationTokens::new(0).next(), None);
    }

    #[tokio::test]
    async fn test_completion_wakes_waiter_at_zero() {
        let completion = Arc::new(Completion::new(2));

        let waiter = {
            let completion = Arc::clone(&completion);
            tokio::spawn(async move { completion.wait().await })
        };

        completion.done();
        assert_eq!(completion.remaining(), 1);
        completion.done();

        waiter.await.unwrap();
        assert_eq!(completion.remaining(), 0);

        // Nothing to wait for.
        Completion::new(0).wait().await;
    }
}
