//! Writes every metric as one JSON line, either to a file or to the tracing
//! log under the `loadflow::metric` target.

use crate::consumer::Consumer;
use crate::metrics::Metric;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Flat JSON representation of a metric.
#[derive(Debug, Serialize)]
pub struct MetricRecord<'a> {
    pub name: &'a str,
    pub operation: &'a str,
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: f64,
}

impl<'a> From<&'a Metric> for MetricRecord<'a> {
    fn from(metric: &'a Metric) -> Self {
        Self {
            name: &metric.name,
            operation: &metric.operation.name,
            method: &metric.operation.method,
            host: &metric.operation.host,
            path: &metric.operation.path,
            started_at: metric.started_at,
            finished_at: metric.finished_at,
            duration_ms: metric.duration_ms(),
        }
    }
}

#[derive(Default)]
struct LogState {
    writer: Option<BufWriter<File>>,
    written: u64,
    error: Option<anyhow::Error>,
}

pub struct LogConsumer {
    enabled: bool,
    output: Option<PathBuf>,
    state: Mutex<LogState>,
}

impl LogConsumer {
    pub fn new(enabled: bool, output: Option<PathBuf>) -> Self {
        Self {
            enabled,
            output,
            state: Mutex::new(LogState::default()),
        }
    }

    fn open(&self) -> Result<Option<BufWriter<File>>> {
        match &self.output {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create metric log {:?}", path))?;
                Ok(Some(BufWriter::new(file)))
            }
            None => Ok(None),
        }
    }

    fn write(state: &mut LogState, metric: &Metric) -> Result<()> {
        let line = serde_json::to_string(&MetricRecord::from(metric))?;
        match state.writer.as_mut() {
            Some(writer) => writeln!(writer, "{}", line)?,
            None => info!(target: "loadflow::metric", "{}", line),
        }
        state.written += 1;
        Ok(())
    }
}

#[async_trait]
impl Consumer for LogConsumer {
    fn loaded(&self) -> bool {
        self.enabled
    }

    async fn run(&self, mut input: mpsc::Receiver<Metric>, _iterations: usize, _concurrency: usize) {
        {
            let mut state = self.state.lock();
            *state = LogState::default();
            match self.open() {
                Ok(writer) => state.writer = writer,
                Err(e) => state.error = Some(e),
            }
        }

        // Keep draining after a failure so the fan-out is never blocked.
        while let Some(metric) = input.recv().await {
            let mut state = self.state.lock();
            if state.error.is_some() {
                continue;
            }
            if let Err(e) = Self::write(&mut state, &metric) {
                warn!("Metric log stopped: {}", e);
                state.error = Some(e);
            }
        }
    }

    async fn finalize(&self, _elapsed: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(e) = state.error.take() {
            return Err(e);
        }
        if let Some(writer) = state.writer.as_mut() {
            writer.flush().context("Failed to flush metric log")?;
        }
        if let Some(path) = &self.output {
            info!("Wrote {} metrics to {:?}", state.written, path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Operation;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let consumer = LogConsumer::new(true, Some(path.clone()));
        let operation = Arc::new(Operation::new("users", "GET", "api", "/users"));

        let (tx, rx) = mpsc::channel(4);
        for _ in 0..3 {
            let metric = Metric::new(
                "users",
                Arc::clone(&operation),
                Utc::now(),
                Duration::from_millis(2),
            );
            tx.send(metric).await.unwrap();
        }
        drop(tx);

        consumer.run(rx, 3, 1).await;
        consumer.finalize(Duration::from_secs(1)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["name"], "users");
        assert_eq!(record["method"], "GET");
        assert_eq!(record["path"], "/users");
        assert_eq!(record["duration_ms"], 2.0);
    }

    #[tokio::test]
    async fn test_unwritable_output_fails_finalize() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("metrics.jsonl");
        let consumer = LogConsumer::new(true, Some(path));

        let (tx, rx) = mpsc::channel(1);
        tx.send(Metric::new(
            "x",
            Arc::new(Operation::unnamed()),
            Utc::now(),
            Duration::ZERO,
        ))
        .await
        .unwrap();
        drop(tx);

        consumer.run(rx, 1, 1).await;
        assert!(consumer.finalize(Duration::ZERO).await.is_err());
    }
}
