//! Workload client handed to flows.
//!
//! Each worker owns one [`BenchClient`]. It bundles an HTTP client configured
//! for connection reuse (or not) with a [`MeasurementCollector`], so a flow can
//! wrap any request in a timed window. The client does not interpret HTTP
//! failures; that is left to the flow.

use crate::collector::{MeasurementCollector, OpenMeasurement};
use crate::error::Result;
use crate::metrics::Operation;
use std::sync::Arc;
use tracing::debug;

/// Idle connections kept per host when keep-alive is enabled.
pub const MAX_IDLE_CONNS_PER_HOST: usize = 16;

pub struct BenchClient {
    http: reqwest::Client,
    collector: MeasurementCollector,
    keep_alive: bool,
}

impl BenchClient {
    /// Build a client for one worker.
    ///
    /// With `keep_alive` disabled no idle connection is ever pooled, so every
    /// request opens a new TCP connection.
    pub fn new(collector: MeasurementCollector, keep_alive: bool) -> Result<Self> {
        let idle_per_host = if keep_alive {
            MAX_IDLE_CONNS_PER_HOST
        } else {
            0
        };

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(idle_per_host)
            .build()?;

        debug!(keep_alive, "created workload client");
        Ok(Self {
            http,
            collector,
            keep_alive,
        })
    }

    /// The underlying HTTP client, for requests the flow times itself or
    /// does not time at all.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn collector(&self) -> &MeasurementCollector {
        &self.collector
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Open a measurement window for an arbitrary operation.
    pub fn new_measure(&self, name: impl Into<String>, operation: Arc<Operation>) -> OpenMeasurement {
        self.collector.new_measure(name, operation)
    }

    /// Execute `request` and record its latency under `name`.
    ///
    /// The metric is recorded whether or not the transport succeeded, so failed
    /// attempts show up in the latency data. A transport failure is returned as
    /// [`HarnessError::Transport`](crate::error::HarnessError::Transport).
    pub async fn execute(
        &self,
        name: impl Into<String>,
        request: reqwest::Request,
    ) -> Result<reqwest::Response> {
        let measure = self.collector.measure_request(name, &request);
        let response = self.http.execute(request).await;
        measure.finish().await?;

        Ok(response?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[tokio::test]
    async fn test_client_construction() {
        let (sink, _output) = tokio::sync::mpsc::channel(1);
        let collector = MeasurementCollector::new(&sink);

        let reusing = BenchClient::new(collector.clone(), true).unwrap();
        assert!(reusing.keep_alive());

        let fresh = BenchClient::new(collector, false).unwrap();
        assert!(!fresh.keep_alive());
    }

    #[tokio::test]
    async fn test_transport_failure_still_records_metric() {
        let (sink, mut output) = tokio::sync::mpsc::channel(1);
        let client = BenchClient::new(MeasurementCollector::new(&sink), true).unwrap();

        // Port 9 (discard) on localhost is almost never listening.
        let request = client
            .http()
            .get("http://127.0.0.1:9/unreachable")
            .build()
            .unwrap();

        let result = client.execute("unreachable", request).await;
        assert!(matches!(result, Err(HarnessError::Transport(_))));

        let metric = output.recv().await.unwrap();
        assert_eq!(metric.name, "unreachable");
        assert_eq!(metric.operation.path, "/unreachable");
    }
}
