//! Built-in consumers.
//!
//! | name       | flag         | output                                         |
//! |------------|--------------|------------------------------------------------|
//! | `live`     | `--live`     | per-operation latency and rate every interval  |
//! | `report`   | `--report`   | latency report per operation after the run     |
//! | `log`      | `--log`      | one JSON line per metric                       |
//! | `timeline` | `--timeline` | latency/throughput series written as JSON      |
//!
//! All of them are always registered; the flag only decides whether the
//! consumer reports itself as loaded for the run.

pub mod live;
pub mod log;
pub mod report;
pub mod timeline;

pub use live::LiveConsumer;
pub use log::LogConsumer;
pub use report::ReportConsumer;
pub use timeline::TimelineConsumer;

use crate::cli::Args;
use crate::consumer::ConsumerRegistry;
use crate::error::Result;
use std::sync::Arc;

/// Register the built-in consumers, activated by their command-line flags.
pub fn register_builtin(registry: &mut ConsumerRegistry, args: &Args) -> Result<()> {
    registry.register("live", Arc::new(LiveConsumer::new(args.live, args.live_interval)))?;
    registry.register(
        "report",
        Arc::new(ReportConsumer::new(args.report, args.percentiles.clone())),
    )?;
    registry.register("log", Arc::new(LogConsumer::new(args.log, args.log_output.clone())))?;
    registry.register(
        "timeline",
        Arc::new(TimelineConsumer::new(args.timeline, args.timeline_output.clone())),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_register_builtin() {
        let args = Args::parse_from(["loadflow", "--report", "--timeline"]);
        let mut registry = ConsumerRegistry::new();
        register_builtin(&mut registry, &args).unwrap();

        assert_eq!(registry.names(), vec!["live", "report", "log", "timeline"]);
        assert!(!registry.get("live").unwrap().loaded());
        assert!(registry.get("report").unwrap().loaded());
        assert!(!registry.get("log").unwrap().loaded());
        assert!(registry.get("timeline").unwrap().loaded());
    }
}
