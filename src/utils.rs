//! # Utility Functions
//!
//! Formatting helpers for console output, configuration validation and a
//! couple of small table printers used by the final summary.
//!
//! ```rust
//! use p2p_tx_bench::utils::*;
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_message_rate(15500.0), "15.50K msg/s");
//! validate_peer_count(2)?;
//! # Ok(())
//! # }
//! ```

use anyhow::{bail, Result};
use std::time::Duration;
use uuid::Uuid;

/// Generate a unique identifier for a benchmark run
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Convert a duration to a human-readable string
///
/// Sub-minute values use the largest unit that keeps the number above one
/// with two decimals; longer values use a compound minutes/seconds form.
///
/// ```rust
/// # use p2p_tx_bench::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
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

/// Format a message rate with decimal scaling
///
/// ```rust
/// # use p2p_tx_bench::utils::format_message_rate;
/// assert_eq!(format_message_rate(750.0), "750 msg/s");
/// assert_eq!(format_message_rate(2300000.0), "2.30M msg/s");
/// ```
pub fn format_message_rate(messages_per_second: f64) -> String {
    if messages_per_second < 1000.0 {
        format!("{:.0} msg/s", messages_per_second)
    } else if messages_per_second < 1_000_000.0 {
        format!("{:.2}K msg/s", messages_per_second / 1000.0)
    } else {
        format!("{:.2}M msg/s", messages_per_second / 1_000_000.0)
    }
}

/// A trial needs a sending peer and at least one other peer to verify against
pub fn validate_peer_count(peers: usize) -> Result<()> {
    if peers < 2 {
        bail!("At least 2 peers are required (got {})", peers);
    }
    if peers > 1024 {
        bail!("Peer count too large: {} (maximum 1024)", peers);
    }
    Ok(())
}

pub fn validate_trial_count(trials: usize) -> Result<()> {
    if trials == 0 {
        bail!("Trial count must be at least 1");
    }
    Ok(())
}

/// Percentiles must lie in `0.0..=100.0`
pub fn validate_percentiles(percentiles: &[f64]) -> Result<()> {
    for &p in percentiles {
        if !(0.0..=100.0).contains(&p) {
            bail!("Invalid percentile: {} (must be between 0 and 100)", p);
        }
    }
    Ok(())
}

/// Print a table row with fixed column widths
///
/// ```rust
/// # use p2p_tx_bench::utils::{print_table_row, print_table_separator};
/// let widths = [8, 10];
/// print_table_separator(&widths);
/// print_table_row(&["Mode", "Result"], &widths);
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

pub fn print_table_separator(widths: &[usize]) {
    print!("+");
    for &width in widths {
        print!("{}", "-".repeat(width + 2));
        print!("+");
    }
    println!();
}
