use anyhow::Result;
use async_trait::async_trait;
use loadflow::{
    BenchClient, Benchmark, BenchmarkConfig, Consumer, ConsumerRegistry, Flow, HarnessError,
    Metric, OpenMeasurement, Operation,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Records one metric per call, named after the call index. Fails on
/// `fail_at` when set.
struct CountingFlow {
    calls: AtomicUsize,
    fail_at: Option<usize>,
    operation: Arc<Operation>,
}

impl CountingFlow {
    fn new(fail_at: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_at,
            operation: Arc::new(Operation::new("counting", "GET", "localhost", "/count")),
        })
    }
}

#[async_trait]
impl Flow for CountingFlow {
    async fn run_flow(&self, client: &BenchClient) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if Some(call) == self.fail_at {
            anyhow::bail!("call {} failed", call);
        }

        let measure = client.new_measure(call.to_string(), Arc::clone(&self.operation));
        tokio::task::yield_now().await;
        measure.finish().await?;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingConsumer {
    load: bool,
    received: Mutex<Vec<Metric>>,
    params: Mutex<Option<(usize, usize)>>,
    run_returned: AtomicBool,
    finalized: Mutex<Option<Duration>>,
    finalized_after_close: AtomicBool,
}

impl RecordingConsumer {
    fn new(load: bool) -> Arc<Self> {
        Arc::new(Self {
            load,
            ..Default::default()
        })
    }

    fn names(&self) -> Vec<String> {
        self.received.lock().iter().map(|m| m.name.clone()).collect()
    }
}

#[async_trait]
impl Consumer for RecordingConsumer {
    fn loaded(&self) -> bool {
        self.load
    }

    async fn run(&self, mut input: mpsc::Receiver<Metric>, iterations: usize, concurrency: usize) {
        *self.params.lock() = Some((iterations, concurrency));
        while let Some(metric) = input.recv().await {
            self.received.lock().push(metric);
        }
        self.run_returned.store(true, Ordering::SeqCst);
    }

    async fn finalize(&self, elapsed: Duration) -> Result<()> {
        self.finalized_after_close
            .store(self.run_returned.load(Ordering::SeqCst), Ordering::SeqCst);
        *self.finalized.lock() = Some(elapsed);
        Ok(())
    }
}

fn registry_with(consumers: &[(&str, Arc<RecordingConsumer>)]) -> ConsumerRegistry {
    let mut registry = ConsumerRegistry::new();
    for (name, consumer) in consumers {
        registry.register(*name, consumer.clone()).unwrap();
    }
    registry
}

#[tokio::test]
async fn zero_iterations_runs_full_protocol() -> Result<()> {
    let consumer = RecordingConsumer::new(true);
    let flow = CountingFlow::new(None);

    let benchmark = Benchmark::new(
        BenchmarkConfig::new(0, 1),
        registry_with(&[("rec", consumer.clone())]),
    )?;
    let summary = benchmark.run(flow.clone()).await?;

    assert_eq!(flow.calls.load(Ordering::SeqCst), 0);
    assert_eq!(summary.executed, 0);
    assert_eq!(summary.measurements, 0);
    assert!(consumer.received.lock().is_empty());
    assert_eq!(*consumer.params.lock(), Some((0, 1)));
    assert!(consumer.finalized.lock().is_some());
    assert!(consumer.finalized_after_close.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn single_worker_preserves_order() -> Result<()> {
    let consumer = RecordingConsumer::new(true);
    let flow = CountingFlow::new(None);

    let benchmark = Benchmark::new(
        BenchmarkConfig::new(10, 1),
        registry_with(&[("rec", consumer.clone())]),
    )?;
    let summary = benchmark.run(flow.clone()).await?;

    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(consumer.names(), expected);
    assert_eq!(summary.executed, 10);
    assert_eq!(*consumer.finalized.lock(), Some(summary.elapsed));
    Ok(())
}

#[tokio::test]
async fn concurrent_workers_execute_exactly_n_times() -> Result<()> {
    let first = RecordingConsumer::new(true);
    let second = RecordingConsumer::new(true);
    let flow = CountingFlow::new(None);

    let benchmark = Benchmark::new(
        BenchmarkConfig::new(100, 10).with_buffer_size(4),
        registry_with(&[("first", first.clone()), ("second", second.clone())]),
    )?;
    let summary = benchmark.run(flow.clone()).await?;

    assert_eq!(flow.calls.load(Ordering::SeqCst), 100);
    assert_eq!(summary.executed, 100);
    assert_eq!(summary.measurements, 100);
    assert_eq!(first.received.lock().len(), 100);

    // Same stream, same order, for every consumer.
    assert_eq!(first.names(), second.names());

    let mut names = first.names();
    names.sort_by_key(|name| name.parse::<usize>().unwrap());
    names.dedup();
    assert_eq!(names.len(), 100);
    Ok(())
}

#[tokio::test]
async fn unloaded_consumer_is_skipped() -> Result<()> {
    let loaded = RecordingConsumer::new(true);
    let unloaded = RecordingConsumer::new(false);

    let benchmark = Benchmark::new(
        BenchmarkConfig::new(5, 2),
        registry_with(&[("loaded", loaded.clone()), ("unloaded", unloaded.clone())]),
    )?;
    benchmark.run(CountingFlow::new(None)).await?;

    assert_eq!(loaded.received.lock().len(), 5);
    assert!(loaded.finalized.lock().is_some());

    assert!(unloaded.params.lock().is_none());
    assert!(unloaded.received.lock().is_empty());
    assert!(unloaded.finalized.lock().is_none());
    Ok(())
}

#[tokio::test]
async fn failing_iteration_aborts_without_finalize() {
    let consumer = RecordingConsumer::new(true);
    let flow = CountingFlow::new(Some(5));

    let benchmark = Benchmark::new(
        BenchmarkConfig::new(10, 1),
        registry_with(&[("rec", consumer.clone())]),
    )
    .unwrap();
    let err = benchmark.run(flow.clone()).await.unwrap_err();

    match err {
        HarnessError::Workload { iteration, worker, .. } => {
            assert_eq!(iteration, 5);
            assert_eq!(worker, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(flow.calls.load(Ordering::SeqCst), 6);
    assert!(consumer.finalized.lock().is_none());
}

#[tokio::test]
async fn benchmark_can_run_twice() -> Result<()> {
    let consumer = RecordingConsumer::new(true);
    let benchmark = Benchmark::new(
        BenchmarkConfig::new(3, 1),
        registry_with(&[("rec", consumer.clone())]),
    )?;

    benchmark.run(CountingFlow::new(None)).await?;
    benchmark.run(CountingFlow::new(None)).await?;

    assert_eq!(consumer.received.lock().len(), 6);
    Ok(())
}

#[tokio::test]
async fn metric_timestamps_match_duration() -> Result<()> {
    let consumer = RecordingConsumer::new(true);
    let benchmark = Benchmark::new(
        BenchmarkConfig::new(20, 4),
        registry_with(&[("rec", consumer.clone())]),
    )?;
    benchmark.run(CountingFlow::new(None)).await?;

    for metric in consumer.received.lock().iter() {
        assert!(metric.finished_at >= metric.started_at);
        assert_eq!(
            (metric.finished_at - metric.started_at).to_std().unwrap(),
            metric.duration
        );
        assert_eq!(metric.operation.name, "counting");
    }
    Ok(())
}

/// Each call opens a window and finishes the one left open by the previous
/// call, so the last window is never finished.
#[derive(Default)]
struct OverlappingFlow {
    pending: Mutex<Option<OpenMeasurement>>,
}

#[async_trait]
impl Flow for OverlappingFlow {
    async fn run_flow(&self, client: &BenchClient) -> Result<()> {
        let next = client.new_measure("overlap", Arc::new(Operation::unnamed()));
        let previous = self.pending.lock().replace(next);
        if let Some(previous) = previous {
            previous.finish().await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn unfinished_window_does_not_block_the_run() -> Result<()> {
    let consumer = RecordingConsumer::new(true);
    let flow = Arc::new(OverlappingFlow::default());

    let benchmark = Benchmark::new(
        BenchmarkConfig::new(3, 1),
        registry_with(&[("rec", consumer.clone())]),
    )?;
    let summary = tokio::time::timeout(Duration::from_secs(5), benchmark.run(flow.clone()))
        .await
        .expect("run must complete while a window is still open")?;

    assert_eq!(summary.executed, 3);
    assert_eq!(summary.measurements, 2);
    assert_eq!(consumer.received.lock().len(), 2);
    assert!(consumer.finalized.lock().is_some());
    assert!(flow.pending.lock().is_some());
    Ok(())
}

#[test]
fn duplicate_registration_keeps_first() {
    let first = RecordingConsumer::new(true);
    let mut registry = ConsumerRegistry::new();
    registry.register("rec", first).unwrap();

    let err = registry
        .register("rec", RecordingConsumer::new(false))
        .unwrap_err();
    assert!(matches!(err, HarnessError::DuplicateRegistration(_)));
    assert!(registry.get("rec").unwrap().loaded());
}

#[test]
fn zero_concurrency_is_a_configuration_error() {
    let err = Benchmark::new(BenchmarkConfig::new(10, 0), ConsumerRegistry::new())
        .err()
        .unwrap();
    assert!(matches!(err, HarnessError::Configuration(_)));
}
