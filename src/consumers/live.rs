//! Live throughput printer.
//!
//! Every interval, prints one line per operation name with the number of
//! metrics seen since the previous tick, their mean latency, and the
//! observed rate. Counters reset on every tick.

use crate::consumer::Consumer;
use crate::metrics::{utils::format_request_rate, Metric};
use crate::utils::create_progress_indicator;
use async_trait::async_trait;
use colored::*;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Window {
    count: u64,
    total_ns: u128,
}

/// Per-interval counters keyed by metric name.
#[derive(Debug, Default)]
pub struct LiveWindow {
    windows: BTreeMap<String, Window>,
    seen: usize,
}

/// One printed line of the live output.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveLine {
    pub name: String,
    pub count: u64,
    pub mean_latency_ms: f64,
    pub requests_per_second: f64,
}

impl LiveWindow {
    pub fn record(&mut self, metric: &Metric) {
        let window = self.windows.entry(metric.name.clone()).or_default();
        window.count += 1;
        window.total_ns += metric.duration.as_nanos();
        self.seen += 1;
    }

    /// Total metrics recorded since the window was created.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Drain the counters accumulated over `period`, sorted by name.
    /// Names without activity in the period are skipped.
    pub fn tick(&mut self, period: Duration) -> Vec<LiveLine> {
        let secs = period.as_secs_f64();
        let lines = self
            .windows
            .iter()
            .filter(|(_, window)| window.count > 0)
            .map(|(name, window)| LiveLine {
                name: name.clone(),
                count: window.count,
                mean_latency_ms: window.total_ns as f64 / window.count as f64 / 1_000_000.0,
                requests_per_second: if secs > 0.0 {
                    window.count as f64 / secs
                } else {
                    0.0
                },
            })
            .collect();

        for window in self.windows.values_mut() {
            *window = Window::default();
        }
        lines
    }
}

/// Shortest accepted refresh period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct LiveConsumer {
    enabled: bool,
    interval: Duration,
    window: Mutex<LiveWindow>,
}

impl LiveConsumer {
    /// `interval` is raised to [`MIN_INTERVAL`] when shorter.
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval: interval.max(MIN_INTERVAL),
            window: Mutex::new(LiveWindow::default()),
        }
    }

    fn print_tick(&self, period: Duration, iterations: usize) {
        let (lines, seen) = {
            let mut window = self.window.lock();
            (window.tick(period), window.seen())
        };

        if iterations > 0 {
            println!(
                "{} {}/{}",
                create_progress_indicator(seen, iterations, 30).cyan(),
                seen,
                iterations
            );
        }
        for line in lines {
            println!(
                "  {}: {:.3} [ms]  {}  ({} in {:.1}s)",
                line.name.bold(),
                line.mean_latency_ms,
                format_request_rate(line.requests_per_second),
                line.count,
                period.as_secs_f64()
            );
        }
    }
}

#[async_trait]
impl Consumer for LiveConsumer {
    fn loaded(&self) -> bool {
        self.enabled
    }

    async fn run(&self, mut input: mpsc::Receiver<Metric>, iterations: usize, _concurrency: usize) {
        *self.window.lock() = LiveWindow::default();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                metric = input.recv() => match metric {
                    Some(metric) => self.window.lock().record(&metric),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.print_tick(last_tick.elapsed(), iterations);
                    last_tick = Instant::now();
                }
            }
        }

        // Flush whatever arrived after the last tick.
        self.print_tick(last_tick.elapsed(), iterations);
    }

    async fn finalize(&self, _elapsed: Duration) -> anyhow::Result<()> {
        Ok(())
    }
}
