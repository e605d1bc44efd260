//! # Consumer Registry and Fan-out
//!
//! Consumers are pluggable analysis backends (live printer, report, log,
//! timeline). They are registered once on a [`ConsumerRegistry`] owned by the
//! composition root and take part in every run for which [`Consumer::loaded`]
//! returns true.
//!
//! ## Run protocol
//!
//! The protocol is encoded in the types, so the steps cannot be reordered:
//!
//! 1. [`ConsumerRegistry::initialize`] asks each consumer whether it is loaded,
//!    creates one bounded input per loaded consumer and spawns its
//!    [`Consumer::run`]. Returns [`ActiveConsumers`].
//! 2. [`ActiveConsumers::pipe`] starts the broadcast task that copies every
//!    metric from the collector output to every input, in order. Returns a
//!    [`FanOut`].
//! 3. Once the collector output is closed, the broadcast task closes every
//!    consumer input and fires its done signal. [`FanOut::drained`] waits for
//!    that signal.
//! 4. [`FanOut::finalize`] waits for the done signal, waits for each consumer's
//!    `run` to return, then calls [`Consumer::finalize`] in registration order.
//!
//! A consumer therefore never sees `finalize` while it could still read a
//! pending metric.

use crate::error::{HarnessError, Result};
use crate::metrics::Metric;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Analysis backend fed with the measurement stream of a run.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Whether this consumer takes part in the current run.
    fn loaded(&self) -> bool;

    /// Consume the input until it is closed. Must not return early while the
    /// input is still open.
    async fn run(&self, input: mpsc::Receiver<Metric>, iterations: usize, concurrency: usize);

    /// Produce the final output of the run. Called once, after `run` returned.
    async fn finalize(&self, elapsed: Duration) -> anyhow::Result<()>;
}

struct Registration {
    name: String,
    consumer: Arc<dyn Consumer>,
}

/// Registered consumers, in registration order.
#[derive(Default)]
pub struct ConsumerRegistry {
    entries: Vec<Registration>,
}

impl fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("consumers", &self.names())
            .finish()
    }
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer under a unique, non-blank name.
    pub fn register(&mut self, name: impl Into<String>, consumer: Arc<dyn Consumer>) -> Result<()> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(HarnessError::InvalidConsumer {
                name,
                reason: "consumer name cannot be blank".to_string(),
            });
        }
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(HarnessError::DuplicateRegistration(name));
        }

        debug!("Registered consumer '{}'", name);
        self.entries.push(Registration { name, consumer });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Consumer>> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.consumer)
    }

    /// Start every loaded consumer with an automatically sized input buffer.
    pub fn initialize(&self, iterations: usize, concurrency: usize) -> ActiveConsumers {
        self.initialize_with_capacity(
            iterations,
            concurrency,
            crate::defaults::channel_capacity(iterations),
        )
    }

    /// Start every loaded consumer, each with an input buffer of `capacity`.
    pub fn initialize_with_capacity(
        &self,
        iterations: usize,
        concurrency: usize,
        capacity: usize,
    ) -> ActiveConsumers {
        let capacity = capacity.max(1);
        let mut active = Vec::new();

        for entry in &self.entries {
            if !entry.consumer.loaded() {
                debug!("Consumer '{}' is not loaded for this run", entry.name);
                continue;
            }

            let (input, receiver) = mpsc::channel(capacity);
            let consumer = Arc::clone(&entry.consumer);
            let task = tokio::spawn(async move {
                consumer.run(receiver, iterations, concurrency).await;
            });

            active.push(ActiveConsumer {
                name: entry.name.clone(),
                consumer: Arc::clone(&entry.consumer),
                input,
                task,
            });
        }

        info!(
            "Started {} of {} registered consumers",
            active.len(),
            self.entries.len()
        );
        ActiveConsumers { active }
    }
}

struct ActiveConsumer {
    name: String,
    consumer: Arc<dyn Consumer>,
    input: mpsc::Sender<Metric>,
    task: JoinHandle<()>,
}

/// Consumers started for one run, waiting to be connected to the collector.
pub struct ActiveConsumers {
    active: Vec<ActiveConsumer>,
}

impl ActiveConsumers {
    pub fn names(&self) -> Vec<&str> {
        self.active.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Connect the collector output to every active consumer.
    pub fn pipe(self, output: mpsc::Receiver<Metric>) -> FanOut {
        let mut sinks = Vec::with_capacity(self.active.len());
        let mut runners = Vec::with_capacity(self.active.len());

        for active in self.active {
            sinks.push(Sink {
                name: active.name.clone(),
                input: active.input,
            });
            runners.push(Runner {
                name: active.name,
                consumer: active.consumer,
                task: active.task,
            });
        }

        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let forwarded = broadcast(output, sinks).await;
            // The receiver is gone only when the run was aborted.
            let _ = done_tx.send(forwarded);
        });

        FanOut {
            done: Some(done_rx),
            forwarded: None,
            task,
            runners,
        }
    }
}

struct Sink {
    name: String,
    input: mpsc::Sender<Metric>,
}

struct Runner {
    name: String,
    consumer: Arc<dyn Consumer>,
    task: JoinHandle<()>,
}

/// Copy every metric to every sink until `output` closes, then close the sinks.
/// Returns the number of metrics read from `output`.
async fn broadcast(mut output: mpsc::Receiver<Metric>, mut sinks: Vec<Sink>) -> u64 {
    let mut forwarded = 0u64;

    while let Some(metric) = output.recv().await {
        forwarded += 1;

        let mut closed = Vec::new();
        if let Some((last, rest)) = sinks.split_last() {
            for (index, sink) in rest.iter().enumerate() {
                if sink.input.send(metric.clone()).await.is_err() {
                    closed.push(index);
                }
            }
            if last.input.send(metric).await.is_err() {
                closed.push(sinks.len() - 1);
            }
        }

        // A consumer whose run returned early stops receiving; the others
        // keep getting the full stream.
        for index in closed.into_iter().rev() {
            let sink = sinks.remove(index);
            warn!(
                "Consumer '{}' stopped reading its input before the end of the stream",
                sink.name
            );
        }
    }

    debug!(
        "Measurement stream closed after {} metrics; closing {} consumer inputs",
        forwarded,
        sinks.len()
    );
    drop(sinks);
    forwarded
}

/// A running broadcast stage together with the consumers it feeds.
pub struct FanOut {
    done: Option<oneshot::Receiver<u64>>,
    forwarded: Option<u64>,
    task: JoinHandle<()>,
    runners: Vec<Runner>,
}

impl FanOut {
    pub fn names(&self) -> Vec<&str> {
        self.runners.iter().map(|r| r.name.as_str()).collect()
    }

    /// Wait until the collector output is closed and every metric has been
    /// handed to every consumer input. Returns the number of metrics
    /// broadcast.
    pub async fn drained(&mut self) -> Result<u64> {
        if let Some(forwarded) = self.forwarded {
            return Ok(forwarded);
        }

        let done = self.done.take().ok_or(HarnessError::FanOutStopped)?;
        let forwarded = done.await.map_err(|_| HarnessError::FanOutStopped)?;
        self.forwarded = Some(forwarded);
        Ok(forwarded)
    }

    /// Finalize every active consumer in registration order.
    ///
    /// Waits for the stream to drain and for each consumer's `run` to return
    /// before calling its `finalize`. Every consumer is finalized even if an
    /// earlier one fails; the first failure is returned.
    pub async fn finalize(mut self, elapsed: Duration) -> Result<u64> {
        let forwarded = self.drained().await?;
        let mut first_error = None;

        for runner in self.runners {
            if let Err(e) = runner.task.await {
                error!("Consumer '{}' run task failed: {}", runner.name, e);
                first_error.get_or_insert(HarnessError::Consumer {
                    name: runner.name,
                    source: anyhow::anyhow!("run task failed: {}", e),
                });
                continue;
            }

            debug!("Finalizing consumer '{}'", runner.name);
            if let Err(source) = runner.consumer.finalize(elapsed).await {
                error!("Consumer '{}' failed to finalize: {:#}", runner.name, source);
                first_error.get_or_insert(HarnessError::Consumer {
                    name: runner.name,
                    source,
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(forwarded),
        }
    }

    /// Stop the broadcast task and every consumer task without finalizing.
    pub fn abort(self) {
        self.task.abort();
        for runner in &self.runners {
            runner.task.abort();
        }
        warn!(
            "Aborted fan-out and {} consumer tasks without finalizing",
            self.runners.len()
        );
    }
}
