//! Error taxonomy for the harness.
//!
//! Configuration and registration errors are raised synchronously, before any
//! worker or consumer task exists. A [`HarnessError::Workload`] is fatal for the
//! run that produced it: the engine stops every task it spawned and returns it
//! without finalizing consumers.

use thiserror::Error;

/// Boxed error type returned by user workloads.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid run parameters, detected before any worker starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A consumer name was registered twice. The first registration is kept.
    #[error("consumer '{0}' is already registered")]
    DuplicateRegistration(String),

    /// A consumer registration that cannot be accepted.
    #[error("invalid consumer registration '{name}': {reason}")]
    InvalidConsumer { name: String, reason: String },

    /// A workload execution failed. This aborts the whole run.
    #[error("workload failed on iteration {iteration} (worker {worker}): {source}")]
    Workload {
        iteration: usize,
        worker: usize,
        #[source]
        source: BoxError,
    },

    /// A worker task panicked while executing the workload. Treated like a
    /// workload failure.
    #[error("worker task panicked: {0}")]
    WorkerPanicked(String),

    /// The HTTP call made on behalf of a workload failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The measurement sink was closed while a measurement was being published.
    #[error("measurement sink is closed")]
    CollectorClosed,

    /// The fan-out task ended without signalling that the stream was drained.
    #[error("fan-out stopped before the measurement stream was drained")]
    FanOutStopped,

    /// A consumer failed while producing its final report.
    #[error("consumer '{name}' failed to finalize: {source}")]
    Consumer {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

impl HarnessError {
    /// Wrap any workload error, keeping the iteration and worker it came from.
    pub fn workload(iteration: usize, worker: usize, source: impl Into<BoxError>) -> Self {
        HarnessError::Workload {
            iteration,
            worker,
            source: source.into(),
        }
    }
}
