//! # Measurement Collector
//!
//! Turns timed windows into [`Metric`] values and publishes them on a bounded
//! channel that feeds the consumer fan-out.
//!
//! A window is opened with [`MeasurementCollector::new_measure`], which captures
//! the start instant and returns an [`OpenMeasurement`]. Calling
//! [`OpenMeasurement::finish`] stops the clock, builds the metric and sends it.
//! `finish` takes the measurement by value, so a window can be completed at
//! most once. Dropping an open measurement discards it.
//!
//! Publishing waits when the sink is full. This is the back-pressure that ties
//! the rate of measurement production to the rate of the fan-out.
//!
//! The collector never closes its sink. It only holds a weak handle to it: the
//! owner of the strong `Sender` (the engine) closes the stream by dropping it,
//! regardless of how many collectors or open measurements are still alive.

use crate::error::{HarnessError, Result};
use crate::metrics::{Metric, Operation};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::trace;

/// Producer side of the measurement stream. Cheap to clone; every worker
/// client carries one.
#[derive(Clone, Debug)]
pub struct MeasurementCollector {
    output: mpsc::WeakSender<Metric>,
}

impl MeasurementCollector {
    /// Bind the collector to its output sink. The sink stays open for as
    /// long as the caller keeps `output` alive.
    pub fn new(output: &mpsc::Sender<Metric>) -> Self {
        Self {
            output: output.downgrade(),
        }
    }

    /// Start timing a unit of work.
    pub fn new_measure(
        &self,
        name: impl Into<String>,
        operation: Arc<Operation>,
    ) -> OpenMeasurement {
        OpenMeasurement {
            name: name.into(),
            operation,
            started_at: Utc::now(),
            start: Instant::now(),
            output: self.output.clone(),
        }
    }

    /// Start timing an HTTP request described by `request`.
    pub fn measure_request(
        &self,
        name: impl Into<String>,
        request: &reqwest::Request,
    ) -> OpenMeasurement {
        let name = name.into();
        let operation = Arc::new(Operation::from_request(name.clone(), request));
        self.new_measure(name, operation)
    }
}

/// A measurement window that has been started but not yet completed.
#[derive(Debug)]
#[must_use = "an open measurement records nothing until `finish` is awaited"]
pub struct OpenMeasurement {
    name: String,
    operation: Arc<Operation>,
    started_at: DateTime<Utc>,
    start: Instant,
    output: mpsc::WeakSender<Metric>,
}

impl OpenMeasurement {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation(&self) -> &Arc<Operation> {
        &self.operation
    }

    /// Stop the clock and publish the resulting metric. Waits while the sink is
    /// full. Returns a copy of what was published.
    ///
    /// Fails with [`HarnessError::CollectorClosed`] once the stream has been
    /// closed by its owner.
    pub async fn finish(self) -> Result<Metric> {
        let duration = self.start.elapsed();
        let metric = Metric::new(self.name, self.operation, self.started_at, duration);
        trace!(name = %metric.name, ?duration, "measurement finished");

        let output = self.output.upgrade().ok_or(HarnessError::CollectorClosed)?;
        output
            .send(metric.clone())
            .await
            .map_err(|_| HarnessError::CollectorClosed)?;

        Ok(metric)
    }
}
