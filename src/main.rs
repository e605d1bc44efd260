//! # Loadflow - Main Entry Point
//!
//! The binary is the composition root of the harness:
//! 1. **Initialize logging**: colorized console output, optional log file
//! 2. **Parse arguments**: run parameters, flow target and consumer flags
//! 3. **Register consumers**: every built-in consumer, gated by its flag
//! 4. **Run the benchmark**: the built-in HTTP flow, N times across C workers
//! 5. **Write the summary**: optional JSON run summary
//!
//! A failing iteration aborts the run and the process exits with an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use loadflow::{
    benchmark::{Benchmark, BenchmarkConfig, Flow},
    cli::Args,
    client::BenchClient,
    consumer::ConsumerRegistry,
    consumers, logging,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sends one request per iteration. Transport failures and non-success
/// statuses fail the iteration.
struct HttpFlow {
    name: String,
    method: reqwest::Method,
    url: reqwest::Url,
}

#[async_trait]
impl Flow for HttpFlow {
    async fn run_flow(&self, client: &BenchClient) -> Result<()> {
        let request = client
            .http()
            .request(self.method.clone(), self.url.clone())
            .build()?;
        let response = client.execute(self.name.clone(), request).await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{} {} returned {}", self.method, self.url, status);
        }
        // Read the body so the connection can be reused.
        response.bytes().await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the file appender flushes.
    let _log_guard = logging::init_logging(args.verbose, args.log_file.as_deref())?;

    info!("Starting loadflow {}", loadflow::VERSION);
    debug!("Configuration: {:?}", args);

    let config = BenchmarkConfig::from_args(&args);

    if !args.any_consumer() {
        warn!("No consumer enabled (--live, --report, --log, --timeline); measurements are discarded");
    }

    let mut registry = ConsumerRegistry::new();
    consumers::register_builtin(&mut registry, &args)?;

    let flow = HttpFlow {
        name: args.name.clone(),
        method: args.method.into(),
        url: reqwest::Url::parse(&args.url)
            .with_context(|| format!("Invalid target URL: {}", args.url))?,
    };

    let benchmark = Benchmark::new(config, registry)?;
    let summary = benchmark.run(Arc::new(flow)).await?;

    if let Some(ref output_file) = args.output_file {
        summary.write_json(output_file)?;
    }

    info!(
        "loadflow completed: {:.2} iterations/s",
        summary.iterations_per_second
    );
    Ok(())
}
