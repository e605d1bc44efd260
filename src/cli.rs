use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Loadflow - load generation harness for HTTP workloads
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Number of flow executions
    #[clap(short = 'n', long, default_value_t = crate::defaults::ITERATIONS, help_heading = "Core Options")]
    pub iterations: usize,

    /// Number of concurrent workers
    #[clap(short = 'c', long, default_value_t = crate::defaults::CONCURRENCY, help_heading = "Core Options")]
    pub concurrency: usize,

    /// Reuse TCP connections between requests
    #[clap(
        short = 'k',
        long,
        default_value_t = crate::defaults::KEEP_ALIVE,
        action = ArgAction::Set,
        help_heading = "Core Options"
    )]
    pub keep_alive: bool,

    /// Target URL of the built-in HTTP flow
    #[clap(long, default_value = "http://127.0.0.1:8080/", help_heading = "Flow")]
    pub url: String,

    /// HTTP method of the built-in flow
    #[clap(long, value_enum, default_value_t = HttpMethod::Get, help_heading = "Flow")]
    pub method: HttpMethod,

    /// Metric name recorded for each request of the built-in flow
    #[clap(long, default_value = "request", help_heading = "Flow")]
    pub name: String,

    /// Print per-operation throughput while the run is in progress
    #[clap(long, default_value_t = false, help_heading = "Consumers")]
    pub live: bool,

    /// Print a latency report when the run completes
    #[clap(long, default_value_t = false, help_heading = "Consumers")]
    pub report: bool,

    /// Log every metric as a JSON line
    #[clap(long, default_value_t = false, help_heading = "Consumers")]
    pub log: bool,

    /// Export a latency/throughput timeline as JSON
    #[clap(long, default_value_t = false, help_heading = "Consumers")]
    pub timeline: bool,

    /// JSON lines file of the log consumer (defaults to the tracing log)
    #[clap(long, help_heading = "Consumers")]
    pub log_output: Option<PathBuf>,

    /// Output file of the timeline consumer
    #[clap(long, default_value = crate::defaults::TIMELINE_OUTPUT_FILE, help_heading = "Consumers")]
    pub timeline_output: PathBuf,

    /// Refresh period of the live consumer (e.g. "500ms", "1s")
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Consumers")]
    pub live_interval: Duration,

    /// Percentiles printed by the report consumer
    #[clap(long, num_args = 1.., default_values_t = crate::defaults::REPORT_PERCENTILES.to_vec(), help_heading = "Consumers")]
    pub percentiles: Vec<f64>,

    /// Channel capacity override (one slot per iteration when omitted)
    #[clap(long)]
    pub buffer_size: Option<usize>,

    /// Output file for the run summary (JSON format)
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Verbose output (-v for debug, -vv for trace)
    #[clap(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Additional plain-text log file
    #[clap(long)]
    pub log_file: Option<PathBuf>,
}

/// HTTP methods supported by the built-in flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum HttpMethod {
    #[clap(name = "get")]
    Get,
    #[clap(name = "post")]
    Post,
    #[clap(name = "put")]
    Put,
    #[clap(name = "delete")]
    Delete,
    #[clap(name = "head")]
    Head,
    #[clap(name = "patch")]
    Patch,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", reqwest::Method::from(*self))
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

impl Args {
    /// True when at least one built-in consumer is enabled
    pub fn any_consumer(&self) -> bool {
        self.live || self.report || self.log || self.timeline
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() {
        return Err(format!("Duration must be a finite number: {}", s));
    }
    if num < 0.0 {
        return Err(format!("Duration cannot be negative: {}", s));
    }

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::try_from_secs_f64(num)
            .map_err(|e| format!("Invalid duration {}: {}", s, e))?,
        "m" => Duration::from_secs((num * 60.0) as u64),
        "h" => Duration::from_secs((num * 3600.0) as u64),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    if duration.is_zero() {
        return Err("Duration must be greater than zero".to_string());
    }

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("inf").is_err());
        assert!(parse_duration("NaN").is_err());
        assert!(parse_duration("1e20s").is_err());
        assert!(parse_duration("1e300m").is_ok());
    }

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["loadflow"]);
        assert_eq!(args.iterations, 0);
        assert_eq!(args.concurrency, 1);
        assert!(args.keep_alive);
        assert_eq!(args.method, HttpMethod::Get);
        assert_eq!(args.live_interval, Duration::from_secs(1));
        assert_eq!(args.percentiles.len(), 9);
        assert_eq!(args.timeline_output, PathBuf::from("timeline.json"));
        assert!(args.buffer_size.is_none());
        assert!(!args.any_consumer());
    }

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from([
            "loadflow", "-n", "100", "-c", "10", "-k", "false", "--method", "post", "--report",
            "--live-interval", "250ms", "-vv",
        ]);
        assert_eq!(args.iterations, 100);
        assert_eq!(args.concurrency, 10);
        assert!(!args.keep_alive);
        assert_eq!(args.method, HttpMethod::Post);
        assert!(args.report);
        assert!(args.any_consumer());
        assert_eq!(args.live_interval, Duration::from_millis(250));
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_http_method_display() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
    }
}
