use crate::benchmark::RunParameters;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Outcome of one completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub version: String,
    pub iterations: usize,
    pub concurrency: usize,
    pub keep_alive: bool,
    /// Flow executions that returned successfully
    pub executed: usize,
    /// Metrics delivered through the fan-out
    pub measurements: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub iterations_per_second: f64,
    pub system_info: SystemInfo,
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub benchmark_version: String,
}

impl RunSummary {
    pub fn new(
        params: RunParameters,
        executed: usize,
        measurements: u64,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let finished_at = chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|delta| started_at.checked_add_signed(delta))
            .unwrap_or(started_at);

        let iterations_per_second = if elapsed.is_zero() {
            0.0
        } else {
            executed as f64 / elapsed.as_secs_f64()
        };

        Self {
            run_id: crate::utils::generate_run_id(),
            version: crate::VERSION.to_string(),
            iterations: params.iterations,
            concurrency: params.concurrency,
            keep_alive: params.keep_alive,
            executed,
            measurements,
            started_at,
            finished_at,
            elapsed,
            iterations_per_second,
            system_info: SystemInfo::default(),
        }
    }

    /// Write the summary as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run summary to {:?}", path))?;

        info!("Run summary written to: {:?}", path);
        Ok(())
    }
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: crate::utils::get_cpu_cores(),
            benchmark_version: crate::VERSION.to_string(),
        }
    }
}
