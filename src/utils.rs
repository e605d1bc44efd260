//! # Utility Functions and Helper Module
//!
//! Helpers shared by the engine and the built-in consumers: formatting for
//! console output, validation of run parameters, and system information.
//!
//! ## Usage Examples
//!
//! ```rust
//! use loadflow::utils::*;
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let duration_str = format_duration(Duration::from_micros(1500));
//! assert_eq!(duration_str, "1.50ms");
//!
//! validate_concurrency(8)?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use std::time::Duration;
use uuid::Uuid;

/// Generate a unique identifier for a run
///
/// Returned as a UUID v4 string and recorded in the run summary so that
/// outputs of the same run (summary, timeline, metric log) can be correlated.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// ## Unit Selection Logic
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use loadflow::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_nanos(1250)), "1.25μs");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        // For longer durations, use compound format (hours, minutes, seconds)
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Validate that concurrency level is reasonable
///
/// ## Validation Rules
///
/// - **Minimum**: 1 worker. With zero workers the iterations could never
///   complete and the run would hang.
/// - **Maximum**: [`MAX_CONCURRENCY`](crate::defaults::MAX_CONCURRENCY) workers
pub fn validate_concurrency(concurrency: usize) -> Result<()> {
    if concurrency == 0 {
        anyhow::bail!("Concurrency cannot be zero");
    }
    if concurrency > crate::defaults::MAX_CONCURRENCY {
        anyhow::bail!(
            "Concurrency {} is too high (maximum {})",
            concurrency,
            crate::defaults::MAX_CONCURRENCY
        );
    }
    Ok(())
}

/// Validate a user-provided channel buffer size
///
/// A bounded channel needs at least one slot; the upper bound keeps a
/// mistyped value from reserving gigabytes of metric buffers.
pub fn validate_buffer_size(buffer_size: usize) -> Result<()> {
    if buffer_size == 0 {
        anyhow::bail!("Buffer size cannot be zero");
    }
    if buffer_size > 16 * 1024 * 1024 {
        anyhow::bail!(
            "Buffer size {} is too large (maximum {} slots)",
            buffer_size,
            16 * 1024 * 1024
        );
    }
    Ok(())
}

/// Get the number of CPU cores available
///
/// Uses the `num_cpus` crate, which accounts for container limits and
/// process affinity. Recorded in run summaries for reproducibility.
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

/// Print a table row with proper formatting
///
/// ```rust
/// # use loadflow::utils::{print_table_row, print_table_separator};
/// let widths = [10, 12];
/// print_table_separator(&widths);
/// print_table_row(&["Percentile", "Latency"], &widths);
/// print_table_separator(&widths);
/// ```
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    print!("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        print!(" {:width$} |", column, width = width);
    }
    println!();
}

/// Print a table separator
pub fn print_table_separator(widths: &[usize]) {
    print!("+");
    for &width in widths {
        print!("{}", "-".repeat(width + 2));
        print!("+");
    }
    println!();
}

/// Create a progress bar-like indicator
///
/// ## Edge Cases
///
/// - **Zero Total**: Returns all filled blocks to avoid division by zero
/// - **Overflow**: Caps progress at 100% even if current > total
///
/// ## Examples
///
/// ```rust
/// # use loadflow::utils::create_progress_indicator;
/// assert_eq!(create_progress_indicator(0, 100, 10), "░░░░░░░░░░");
/// assert_eq!(create_progress_indicator(50, 100, 10), "█████░░░░░");
/// assert_eq!(create_progress_indicator(100, 100, 10), "██████████");
/// ```
pub fn create_progress_indicator(current: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return "█".repeat(width);
    }

    let progress = (current as f64 / total as f64).min(1.0);
    let filled = ((progress * width as f64) as usize).min(width);
    let empty = width - filled;

    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}
