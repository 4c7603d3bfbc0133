use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// P2P Tx Bench - bounded-time transaction throughput trials for peer-to-peer messaging
#[derive(Parser, Debug, Clone, Default)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Verification modes to run (space-separated: poll, notify, or both)
    #[clap(short = 'm', long = "mode", value_enum, default_values_t = vec![VerificationMode::Poll], help_heading = "Core Options", num_args = 1..)]
    pub modes: Vec<VerificationMode>,

    /// Number of peers taking part in each trial (peer 0 sends)
    #[clap(short = 'p', long, default_value_t = crate::defaults::PEER_COUNT, help_heading = "Core Options")]
    pub peers: usize,

    /// Number of messages to send per trial
    #[clap(short = 'n', long, default_value_t = crate::defaults::TX_COUNT, help_heading = "Core Options")]
    pub tx_count: usize,

    /// Wall-clock budget for sending (e.g. "500ms", "10s", "1m")
    #[clap(short = 'd', long, value_parser = parse_duration, default_value = "10s", help_heading = "Core Options")]
    pub period: Duration,

    /// How many times to repeat each trial
    #[clap(short = 't', long, default_value_t = 1, help_heading = "Core Options")]
    pub trials: usize,

    /// Do not prime peers as active chatters before notification trials
    #[clap(long, default_value_t = false)]
    pub skip_presence: bool,

    /// Pause after priming presence, before sending starts
    #[clap(long, value_parser = parse_duration, default_value = "1s")]
    pub settle_delay: Duration,

    /// Last chunk included when listing the receiver's messages
    #[clap(long, default_value_t = 1)]
    pub chunk_end: u32,

    /// Percentiles to calculate for per-send latency
    #[clap(long, default_values_t = vec![50.0, 95.0, 99.0])]
    pub percentiles: Vec<f64>,

    /// Simulated latency of every call on the in-process network
    #[clap(long, value_parser = parse_duration, help_heading = "Local Network")]
    pub send_latency: Option<Duration>,

    /// Maximum random extra latency per call on the in-process network
    #[clap(long, value_parser = parse_duration, help_heading = "Local Network")]
    pub jitter: Option<Duration>,

    /// Delay before a message becomes visible to other peers
    #[clap(long, value_parser = parse_duration, help_heading = "Local Network")]
    pub gossip_delay: Option<Duration>,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long, help_heading = "Output")]
    pub output_file: Option<PathBuf>,

    /// Continue running other trials even if one fails
    #[clap(long, default_value_t = false, help_heading = "Output")]
    pub continue_on_error: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count, help_heading = "Output")]
    pub verbose: u8,

    /// Suppress console log output
    #[clap(short = 'q', long, default_value_t = false, help_heading = "Output")]
    pub quiet: bool,

    /// Also write logs to this file
    #[clap(long, help_heading = "Output")]
    pub log_file: Option<PathBuf>,
}

/// How delivery is confirmed after sending
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum VerificationMode {
    /// Query the receiver's message log after sending
    #[value(name = "poll", alias = "gossip")]
    Poll,

    /// Count push notifications while sending
    #[value(name = "notify", alias = "signal")]
    Notify,

    /// Run a poll trial and a notification trial
    #[value(name = "both")]
    Both,
}

impl std::fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationMode::Poll => write!(f, "Poll"),
            VerificationMode::Notify => write!(f, "Notification"),
            VerificationMode::Both => write!(f, "Poll + Notification"),
        }
    }
}

impl VerificationMode {
    /// What a trial's scalar result counts in this mode
    ///
    /// Cut-off trials of either mode report the sent count instead.
    pub fn result_description(&self) -> &'static str {
        match self {
            VerificationMode::Poll => "messages listed by the receiving peer",
            VerificationMode::Notify => "notifications counted, summed over all receiving peers",
            VerificationMode::Both => "per mode",
        }
    }

    /// Expand `Both` into the concrete modes, dropping duplicates
    pub fn expand_all(modes: Vec<VerificationMode>) -> Vec<VerificationMode> {
        if modes.contains(&VerificationMode::Both) {
            return vec![VerificationMode::Poll, VerificationMode::Notify];
        }

        let mut expanded = Vec::with_capacity(modes.len());
        for mode in modes {
            if !expanded.contains(&mode) {
                expanded.push(mode);
            }
        }
        expanded
    }
}

/// Parse duration from string (e.g., "250ms", "10s", "5m", "1h")
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
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(secs).map_err(|e| format!("Duration out of range: {}: {}", s, e))
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
        assert_eq!(parse_duration("0ms").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1e30s").is_err());
        assert!(parse_duration("1e30h").is_err());
    }

    #[test]
    fn test_out_of_range_period_is_a_parse_error() {
        let result = Args::try_parse_from(["p2p-tx-bench", "--period", "1e30h"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verification_mode_display() {
        assert_eq!(VerificationMode::Poll.to_string(), "Poll");
        assert_eq!(VerificationMode::Notify.to_string(), "Notification");
        assert_eq!(VerificationMode::Both.to_string(), "Poll + Notification");
    }

    #[test]
    fn test_result_description_differs_by_mode() {
        assert_ne!(
            VerificationMode::Poll.result_description(),
            VerificationMode::Notify.result_description()
        );
        assert!(VerificationMode::Notify
            .result_description()
            .contains("summed over all receiving peers"));
    }

    #[test]
    fn test_verification_mode_expand_all() {
        let both = vec![VerificationMode::Poll, VerificationMode::Notify];
        assert_eq!(
            VerificationMode::expand_all(vec![VerificationMode::Both]),
            both
        );
        assert_eq!(
            VerificationMode::expand_all(vec![VerificationMode::Notify, VerificationMode::Both]),
            both
        );
        assert_eq!(
            VerificationMode::expand_all(vec![VerificationMode::Notify, VerificationMode::Notify]),
            vec![VerificationMode::Notify]
        );
    }

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from([
            "p2p-tx-bench",
            "-m",
            "signal",
            "gossip",
            "-n",
            "5",
            "--period",
            "250ms",
            "-vv",
        ]);

        assert_eq!(
            args.modes,
            vec![VerificationMode::Notify, VerificationMode::Poll]
        );
        assert_eq!(args.tx_count, 5);
        assert_eq!(args.period, Duration::from_millis(250));
        assert_eq!(args.peers, crate::defaults::PEER_COUNT);
        assert_eq!(args.settle_delay, Duration::from_secs(1));
        assert_eq!(args.verbose, 2);
    }
}
