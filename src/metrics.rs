//! Measurement data model.
//!
//! An [`Operation`] names a logical unit of work (for example "List users" on
//! `GET /users`). A [`Metric`] is one timed occurrence of an operation. Many
//! metrics share the same operation through an `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identity of a unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub method: String,
    pub host: String,
    pub path: String,
}

impl Operation {
    pub fn new(
        name: impl Into<String>,
        method: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            host: host.into(),
            path: path.into(),
        }
    }

    /// An operation with no request behind it. Used when a workload times
    /// something that is not a single HTTP call.
    pub fn unnamed() -> Self {
        Self::default()
    }

    /// Describe an HTTP request. The host keeps an explicit port, so
    /// `http://var:8080/foo` yields host `var:8080` and path `/foo`.
    pub fn from_request(name: impl Into<String>, request: &reqwest::Request) -> Self {
        let url = request.url();
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        Self {
            name: name.into(),
            method: request.method().as_str().to_string(),
            host,
            path: url.path().to_string(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.method.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({} {}{})", self.name, self.method, self.host, self.path)
        }
    }
}

/// One completed measurement.
///
/// `finished_at` is always `started_at + duration`, where `duration` comes from
/// the monotonic clock. Consumers should read `duration` rather than subtract
/// the timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub operation: Arc<Operation>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

impl Metric {
    /// Build a metric from a start timestamp and a measured duration.
    pub fn new(
        name: impl Into<String>,
        operation: Arc<Operation>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        // A window ending past the last representable instant is cut there,
        // and its duration with it, so `finished_at - started_at == duration`.
        let (finished_at, duration) = match chrono::Duration::from_std(duration)
            .ok()
            .and_then(|span| started_at.checked_add_signed(span))
        {
            Some(finished_at) => (finished_at, duration),
            None => {
                let finished_at = DateTime::<Utc>::MAX_UTC;
                let clamped = (finished_at - started_at).to_std().unwrap_or(Duration::ZERO);
                (finished_at, clamped)
            }
        };

        Self {
            name: name.into(),
            operation,
            started_at,
            finished_at,
            duration,
        }
    }

    /// Duration in fractional milliseconds, the unit the reports print.
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_nanos() as f64 / 1_000_000.0
    }
}

/// Formatting helpers for reports
pub mod utils {
    /// Format latency value for human-readable output
    pub fn format_latency(latency_ns: u64) -> String {
        if latency_ns < 1_000 {
            format!("{}ns", latency_ns)
        } else if latency_ns < 1_000_000 {
            format!("{:.2}μs", latency_ns as f64 / 1_000.0)
        } else if latency_ns < 1_000_000_000 {
            format!("{:.2}ms", latency_ns as f64 / 1_000_000.0)
        } else {
            format!("{:.2}s", latency_ns as f64 / 1_000_000_000.0)
        }
    }

    /// Format a request rate for human-readable output
    pub fn format_request_rate(requests_per_second: f64) -> String {
        if requests_per_second < 1_000.0 {
            format!("{:.2} req/s", requests_per_second)
        } else if requests_per_second < 1_000_000.0 {
            format!("{:.2}K req/s", requests_per_second / 1_000.0)
        } else {
            format!("{:.2}M req/s", requests_per_second / 1_000_000.0)
        }
    }
}
