//! # P2P Transaction Benchmark Library
//!
//! Bounded-time serial transaction trials for peer-to-peer messaging
//! applications. A trial sends a workload of small messages from one peer
//! under a wall-clock budget and then checks how many of them reached the
//! other peers.
//!
//! ## Verification Strategies
//!
//! - **Poll**: after sending, query the receiving peer's message log and
//!   count the entries
//! - **Notification**: every sent message is followed by a broadcast signal;
//!   listeners on every peer tally the signals they observe
//!
//! If the budget runs out before the whole workload is sent, verification is
//! skipped and the number of messages that went out is the result.
//!
//! ## Architecture Overview
//!
//! - `peer`: collaborator traits for provisioned peers, plus an in-process
//!   network implementation
//! - `workload`: the synthetic message sequence
//! - `sender`: the budgeted serial send loop
//! - `verify`: poll-based and notification-based verifiers
//! - `trial`: setup, sending, verification and teardown of one trial
//! - `results`: aggregation and JSON output
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use p2p_tx_bench::peer::{LocalNetwork, LocalProvisioner, PeerSettings};
//! use p2p_tx_bench::sender::TrialBudget;
//! use p2p_tx_bench::{TrialConfig, TrialRunner, VerificationMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TrialConfig::new(
//!         VerificationMode::Notify,
//!         3,
//!         100,
//!         TrialBudget::from_millis(10_000),
//!     );
//!     let provisioner = LocalProvisioner::new(LocalNetwork::new(), PeerSettings::default());
//!
//!     let report = TrialRunner::new(config, provisioner).run().await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

/// Command-line interface and configuration
pub mod cli;

/// Structured trial events and observers
pub mod events;

/// Console and file logging setup
pub mod logging;

/// Per-send latency and throughput measurement using HDR histograms
pub mod metrics;

/// Peer abstractions and the in-process network
///
/// The `Peer` trait and its endpoint supertraits are the seam a real
/// messaging node plugs into.
pub mod peer;

/// Result collection, aggregation, and output formatting
pub mod results;

/// Budgeted serial sending
pub mod sender;

/// Trial orchestration
pub mod trial;

pub mod utils;

/// Delivery verification
pub mod verify;

pub mod workload;

pub use cli::{Args, VerificationMode};

pub use peer::{Channel, Peer, PeerError, PeerProvisioner, UnitMessage};

pub use metrics::{LatencyMetrics, SendMetrics, ThroughputMetrics};

pub use results::ResultsManager;

pub use sender::{BudgetedSender, SendOutcome, TrialBudget};

/// Trial execution engine
pub use trial::{TrialConfig, TrialOutcome, TrialReport, TrialRunner};

pub use verify::{NotificationVerifier, PollVerifier, ReceiptTally};

/// The current version of the benchmark, used in result output
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// One sender and one receiver
    pub const PEER_COUNT: usize = 2;

    /// Default number of messages in a trial workload
    pub const TX_COUNT: usize = 100;

    /// Pause after priming presence before a notification trial sends.
    /// Gives presence refreshes time to propagate between peers.
    pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

    pub const PERCENTILES: &[f64] = &[50.0, 95.0, 99.0];

    pub const CHANNEL_NAME: &str = "Test Channel";

    pub const CHANNEL_CATEGORY: &str = "General";
}
