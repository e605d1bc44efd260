//! # Loadflow
//!
//! A load generation harness for HTTP workloads. A user-supplied [`Flow`] is
//! executed a fixed number of times across a pool of concurrent workers; every
//! timed unit of work becomes a [`Metric`], and the stream of metrics is
//! broadcast to any number of pluggable [`Consumer`]s (live printer, latency
//! report, JSON log, timeline export).
//!
//! ## Architecture Overview
//!
//! - `benchmark`: the engine and its worker pool
//! - `collector`: turns timed windows into metrics and publishes them
//! - `client`: per-worker HTTP client that can time requests
//! - `consumer`: consumer trait, registry and broadcast fan-out
//! - `consumers`: the built-in analysis backends
//! - `metrics`: the `Operation` / `Metric` data model
//! - `results`: run summary and JSON output
//! - `cli`: command-line interface of the `loadflow` binary
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use loadflow::{BenchClient, Benchmark, BenchmarkConfig, ConsumerRegistry, Flow};
//!
//! struct Homepage;
//!
//! #[async_trait]
//! impl Flow for Homepage {
//!     async fn run_flow(&self, client: &BenchClient) -> anyhow::Result<()> {
//!         let request = client.http().get("http://127.0.0.1:8080/").build()?;
//!         client.execute("homepage", request).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BenchmarkConfig::new(1000, 10);
//!     let registry = ConsumerRegistry::new();
//!     let benchmark = Benchmark::new(config, registry)?;
//!     let summary = benchmark.run(std::sync::Arc::new(Homepage)).await?;
//!     println!("{} iterations in {:?}", summary.executed, summary.elapsed);
//!     Ok(())
//! }
//! ```

/// Benchmark engine
///
/// Owns the run parameters, drives the worker pool and enforces the run
/// protocol: consumers start before the workers and are finalized only after
/// the measurement stream has been fully delivered.
pub mod benchmark;

/// Command-line interface and configuration
pub mod cli;

/// Per-worker HTTP client
pub mod client;

/// Measurement collector
pub mod collector;

/// Consumer contract, registry and fan-out
pub mod consumer;

/// Built-in consumers
///
/// Each backend is gated by its own flag and only takes part in a run when
/// enabled.
pub mod consumers;

pub mod error;

pub mod logging;

/// Measurement data model
pub mod metrics;

/// Run summary and JSON output
pub mod results;

pub mod utils;

pub use benchmark::{Benchmark, BenchmarkConfig, Flow, RunParameters};
pub use cli::Args;
pub use client::BenchClient;
pub use collector::{MeasurementCollector, OpenMeasurement};
pub use consumer::{Consumer, ConsumerRegistry};
pub use error::HarnessError;
pub use metrics::{Metric, Operation};
pub use results::RunSummary;

/// The current version of loadflow, recorded in run summaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Number of flow executions. Zero still runs the full protocol.
    pub const ITERATIONS: usize = 0;

    /// Number of concurrent workers.
    pub const CONCURRENCY: usize = 1;

    /// Upper bound accepted for the concurrency level.
    pub const MAX_CONCURRENCY: usize = 1024;

    /// Reuse TCP connections between requests.
    pub const KEEP_ALIVE: bool = true;

    /// Largest automatically sized channel buffer.
    pub const MAX_CHANNEL_CAPACITY: usize = 65_536;

    /// Refresh period of the live consumer.
    pub const LIVE_INTERVAL: Duration = Duration::from_secs(1);

    /// Output file of the timeline consumer.
    pub const TIMELINE_OUTPUT_FILE: &str = "timeline.json";

    /// Percentiles printed by the report consumer.
    pub const REPORT_PERCENTILES: [f64; 9] = [50.0, 66.0, 75.0, 80.0, 90.0, 95.0, 98.0, 99.0, 100.0];

    /// Channel capacity for a run of `iterations`: one slot per iteration,
    /// bounded above, and never zero.
    pub fn channel_capacity(iterations: usize) -> usize {
        iterations.clamp(1, MAX_CHANNEL_CAPACITY)
    }
}
