//! Latency report printed once the run has completed.
//!
//! Latencies are grouped by [`Operation`] and recorded into an HDR histogram
//! with three significant figures. The output is one block per operation,
//! sorted by operation name.

use crate::consumer::Consumer;
use crate::metrics::{utils::format_latency, Metric, Operation};
use crate::utils::{print_table_row, print_table_separator};
use anyhow::Result;
use async_trait::async_trait;
use colored::*;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

struct OperationStats {
    histogram: Histogram<u64>,
    total_ns: u128,
    min_ns: u64,
    max_ns: u64,
}

impl OperationStats {
    fn new() -> Result<Self> {
        Ok(Self {
            histogram: Histogram::<u64>::new(3)?,
            total_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
        })
    }

    fn record(&mut self, latency: Duration) {
        let latency_ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.histogram.saturating_record(latency_ns);
        self.total_ns += latency_ns as u128;
        self.min_ns = self.min_ns.min(latency_ns);
        self.max_ns = self.max_ns.max(latency_ns);
    }
}

/// Computed report of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationReport {
    pub operation: Operation,
    pub concurrency: usize,
    pub iterations: usize,
    pub completed: u64,
    pub time_taken: Duration,
    pub requests_per_second: f64,
    pub mean_ns: f64,
    pub fastest_ns: u64,
    pub slowest_ns: u64,
    /// (percentile, latency in nanoseconds)
    pub percentiles: Vec<(f64, u64)>,
}

impl OperationReport {
    /// Mean time per request across all concurrent requests.
    pub fn mean_across_concurrent_ns(&self) -> f64 {
        self.mean_ns / self.concurrency.max(1) as f64
    }

    pub fn print(&self) {
        println!();
        println!("{} {}", "Operation:".bold(), self.operation.name);
        if !self.operation.method.is_empty() {
            println!("Method: {}", self.operation.method);
            println!("Host:   {}", self.operation.host);
            println!("Path:   {}", self.operation.path);
        }
        println!();
        println!("Concurrency level:     {}", self.concurrency);
        println!("Time taken for tests:  {:.6} seconds", self.time_taken.as_secs_f64());
        println!("Complete requests:     {} (of {} iterations)", self.completed, self.iterations);
        println!("Requests per second:   {:.2} [#/sec] (mean)", self.requests_per_second);
        println!(
            "Time per request:      {:.3} [ms] (mean)",
            self.mean_ns / 1_000_000.0
        );
        println!(
            "Time per request:      {:.3} [ms] (mean, across all concurrent requests)",
            self.mean_across_concurrent_ns() / 1_000_000.0
        );
        println!("Fastest request:       {}", format_latency(self.fastest_ns));
        println!("Slowest request:       {}", format_latency(self.slowest_ns));
        println!();
        println!("Percentage of the requests served within a certain time");

        let widths = [10, 14];
        print_table_separator(&widths);
        print_table_row(&["Percentile", "Latency"], &widths);
        print_table_separator(&widths);
        for (percentile, value_ns) in &self.percentiles {
            let label = format!("{}%", percentile);
            let latency = format_latency(*value_ns);
            print_table_row(&[label.as_str(), latency.as_str()], &widths);
        }
        print_table_separator(&widths);
    }
}

#[derive(Default)]
struct ReportState {
    iterations: usize,
    concurrency: usize,
    operations: HashMap<Operation, OperationStats>,
}

pub struct ReportConsumer {
    enabled: bool,
    percentiles: Vec<f64>,
    state: Mutex<ReportState>,
}

impl ReportConsumer {
    pub fn new(enabled: bool, percentiles: Vec<f64>) -> Self {
        Self {
            enabled,
            percentiles,
            state: Mutex::new(ReportState::default()),
        }
    }

    fn record(&self, metric: &Metric) -> Result<()> {
        let mut state = self.state.lock();
        if !state.operations.contains_key(metric.operation.as_ref()) {
            state
                .operations
                .insert(metric.operation.as_ref().clone(), OperationStats::new()?);
        }
        if let Some(stats) = state.operations.get_mut(metric.operation.as_ref()) {
            stats.record(metric.duration);
        }
        Ok(())
    }

    /// Build the per-operation reports for a run that took `elapsed`.
    pub fn reports(&self, elapsed: Duration) -> Vec<OperationReport> {
        let state = self.state.lock();
        let secs = elapsed.as_secs_f64();

        let mut reports: Vec<OperationReport> = state
            .operations
            .iter()
            .filter(|(_, stats)| !stats.histogram.is_empty())
            .map(|(operation, stats)| {
                let completed = stats.histogram.len();
                OperationReport {
                    operation: operation.clone(),
                    concurrency: state.concurrency,
                    iterations: state.iterations,
                    completed,
                    time_taken: elapsed,
                    requests_per_second: if secs > 0.0 { completed as f64 / secs } else { 0.0 },
                    mean_ns: stats.total_ns as f64 / completed as f64,
                    fastest_ns: stats.min_ns,
                    slowest_ns: stats.max_ns,
                    percentiles: self
                        .percentiles
                        .iter()
                        .map(|&p| {
                            let value = if p >= 100.0 {
                                stats.max_ns
                            } else {
                                stats.histogram.value_at_percentile(p)
                            };
                            (p, value)
                        })
                        .collect(),
                }
            })
            .collect();

        reports.sort_by(|a, b| a.operation.name.cmp(&b.operation.name));
        reports
    }
}

#[async_trait]
impl Consumer for ReportConsumer {
    fn loaded(&self) -> bool {
        self.enabled
    }

    async fn run(&self, mut input: mpsc::Receiver<Metric>, iterations: usize, concurrency: usize) {
        {
            let mut state = self.state.lock();
            *state = ReportState {
                iterations,
                concurrency,
                operations: HashMap::new(),
            };
        }

        while let Some(metric) = input.recv().await {
            if let Err(e) = self.record(&metric) {
                tracing::warn!("Dropping metric '{}' from report: {}", metric.name, e);
            }
        }
    }

    async fn finalize(&self, elapsed: Duration) -> Result<()> {
        let reports = self.reports(elapsed);
        if reports.is_empty() {
            info!("Report: no measurements recorded");
            return Ok(());
        }
        for report in &reports {
            report.print();
        }
        Ok(())
    }
}
