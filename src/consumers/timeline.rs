//! Latency and throughput over time, exported as JSON.
//!
//! Three series are produced: one point per metric (seconds since the first
//! metric started, latency in ms), the mean latency of every window of
//! `max(1, iterations / 400)` metrics, and the throughput estimated from
//! that mean latency and the concurrency level.

use crate::consumer::Consumer;
use crate::metrics::Metric;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Number of averaged windows a full run is split into.
const WINDOWS_PER_RUN: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The exported document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    pub iterations: usize,
    pub concurrency: usize,
    pub elapsed_secs: f64,
    /// Metrics per averaged window
    pub window: usize,
    /// (seconds since first start, latency ms)
    pub latencies: Vec<Point>,
    /// (seconds since first start, mean latency ms of the window)
    pub average_latency: Vec<Point>,
    /// (seconds since first start, estimated requests per second)
    pub throughput: Vec<Point>,
}

#[derive(Default)]
struct TimelineState {
    timeline: Timeline,
    start: Option<DateTime<Utc>>,
    window_latency_ms: f64,
    window_count: usize,
}

impl TimelineState {
    fn new(iterations: usize, concurrency: usize) -> Self {
        Self {
            timeline: Timeline {
                iterations,
                concurrency,
                window: (iterations / WINDOWS_PER_RUN).max(1),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn record(&mut self, metric: &Metric) {
        let start = *self.start.get_or_insert(metric.started_at);
        let offset = (metric.finished_at - start)
            .num_nanoseconds()
            .map(|ns| ns as f64 / 1e9)
            .unwrap_or(0.0);
        let latency_ms = metric.duration_ms();

        self.timeline.latencies.push(Point {
            x: offset,
            y: latency_ms,
        });

        self.window_latency_ms += latency_ms;
        self.window_count += 1;
        if self.window_count >= self.timeline.window {
            self.close_window(offset);
        }
    }

    fn close_window(&mut self, offset: f64) {
        let avg = self.window_latency_ms / self.window_count as f64;

        // Anchor the throughput series at zero.
        if self.timeline.throughput.is_empty() {
            self.timeline.throughput.push(Point { x: offset, y: 0.0 });
        }
        self.timeline.average_latency.push(Point { x: offset, y: avg });
        let rate = if avg > 0.0 {
            1_000.0 / avg * self.timeline.concurrency as f64
        } else {
            0.0
        };
        self.timeline.throughput.push(Point { x: offset, y: rate });

        self.window_latency_ms = 0.0;
        self.window_count = 0;
    }
}

pub struct TimelineConsumer {
    enabled: bool,
    output: PathBuf,
    state: Mutex<TimelineState>,
}

impl TimelineConsumer {
    pub fn new(enabled: bool, output: PathBuf) -> Self {
        Self {
            enabled,
            output,
            state: Mutex::new(TimelineState::default()),
        }
    }

    /// Snapshot of the series collected so far.
    pub fn timeline(&self) -> Timeline {
        self.state.lock().timeline.clone()
    }
}

#[async_trait]
impl Consumer for TimelineConsumer {
    fn loaded(&self) -> bool {
        self.enabled
    }

    async fn run(&self, mut input: mpsc::Receiver<Metric>, iterations: usize, concurrency: usize) {
        *self.state.lock() = TimelineState::new(iterations, concurrency);

        while let Some(metric) = input.recv().await {
            self.state.lock().record(&metric);
        }
    }

    async fn finalize(&self, elapsed: Duration) -> Result<()> {
        let timeline = {
            let mut state = self.state.lock();
            state.timeline.elapsed_secs = elapsed.as_secs_f64();
            state.timeline.clone()
        };

        let json = serde_json::to_string_pretty(&timeline).context("Failed to serialize timeline")?;
        std::fs::write(&self.output, json)
            .with_context(|| format!("Failed to write timeline to {:?}", self.output))?;

        info!(
            "Timeline with {} points written to: {:?}",
            timeline.latencies.len(),
            self.output
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Operation;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn metric(start: DateTime<Utc>, offset_ms: i64, millis: u64) -> Metric {
        Metric::new(
            "op",
            Arc::new(Operation::unnamed()),
            start + chrono::Duration::milliseconds(offset_ms),
            Duration::from_millis(millis),
        )
    }

    #[test]
    fn test_windows_for_small_runs() {
        let start = Utc::now();
        let mut state = TimelineState::new(10, 2);
        assert_eq!(state.timeline.window, 1);

        state.record(&metric(start, 0, 10));
        state.record(&metric(start, 10, 20));

        let timeline = &state.timeline;
        assert_eq!(timeline.latencies.len(), 2);
        assert_eq!(timeline.latencies[0], Point { x: 0.01, y: 10.0 });
        assert_eq!(timeline.average_latency.len(), 2);
        // Anchor point plus one point per window
        assert_eq!(timeline.throughput.len(), 3);
        assert_eq!(timeline.throughput[0].y, 0.0);
        assert_eq!(timeline.throughput[1].y, 200.0);
    }

    #[test]
    fn test_window_size_scales_with_iterations() {
        let start = Utc::now();
        let mut state = TimelineState::new(4_000, 1);
        assert_eq!(state.timeline.window, 10);

        for i in 0..25 {
            state.record(&metric(start, i, 1));
        }
        assert_eq!(state.timeline.latencies.len(), 25);
        assert_eq!(state.timeline.average_latency.len(), 2);
    }

    #[tokio::test]
    async fn test_finalize_writes_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timeline.json");
        let consumer = TimelineConsumer::new(true, path.clone());

        let (tx, rx) = mpsc::channel(4);
        let start = Utc::now();
        for i in 0..4 {
            tx.send(metric(start, i * 5, 5)).await.unwrap();
        }
        drop(tx);

        consumer.run(rx, 4, 1).await;
        consumer.finalize(Duration::from_millis(30)).await.unwrap();

        let written: Timeline =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.iterations, 4);
        assert_eq!(written.latencies.len(), 4);
        assert_eq!(written.elapsed_secs, 0.03);
    }
}
