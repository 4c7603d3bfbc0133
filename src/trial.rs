//! # Trial Orchestration
//!
//! A trial brings up peers, creates a channel, sends a workload through peer
//! 0 under a wall-clock budget and then confirms delivery with one of the
//! two verifiers.
//!
//! ## Lifecycle
//!
//! 1. **Setup**: provision `peer_count` peers one by one, then create the
//!    trial channel through peer 0
//! 2. **Priming** (notification trials): refresh every peer's presence and
//!    wait `settle_delay`
//! 3. **Sending**: [`BudgetedSender`] drives the workload
//! 4. **Verification**: only when every message went out; otherwise the
//!    partial sent count is the result
//! 5. **Teardown**: every peer that was brought up is shut down exactly
//!    once, whichever way the trial ends
//!
//! ## Results
//!
//! [`TrialOutcome`] carries the authoritative result. Poll trials report the
//! number of messages the receiving peer (peer 1) lists, notification trials
//! report the per-peer [`ReceiptTally`], and cut-off trials of either kind
//! report how many messages were sent.

use crate::{
    cli::{Args, VerificationMode},
    events::{TracingObserver, TrialEvent, TrialObserver},
    metrics::SendMetrics,
    peer::{Channel, ListFilter, Peer, PeerProvisioner},
    sender::{BudgetedSender, SendOutcome, TrialBudget},
    utils::{validate_peer_count, validate_percentiles},
    verify::{NotificationVerifier, PollVerifier, ReceiptTally},
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration of a single trial
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Verification strategy; `Both` must be expanded before running
    pub mode: VerificationMode,

    /// Peers to provision. Peer 0 sends, peer 1 is polled.
    pub peer_count: usize,

    /// Messages in the workload
    pub tx_count: usize,

    pub budget: TrialBudget,

    /// Refresh every peer's presence before a notification trial
    pub prime_presence: bool,

    /// Pause between priming and sending
    pub settle_delay: Duration,

    /// Filter passed to the receiver's message query
    pub list_filter: ListFilter,

    /// Percentiles reported for per-send latency
    pub percentiles: Vec<f64>,

    pub channel_name: String,
    pub channel_category: String,
}

impl TrialConfig {
    /// Configuration with defaults for everything but the core parameters
    pub fn new(
        mode: VerificationMode,
        peer_count: usize,
        tx_count: usize,
        budget: TrialBudget,
    ) -> Self {
        Self {
            mode,
            peer_count,
            tx_count,
            budget,
            prime_presence: true,
            settle_delay: crate::defaults::SETTLE_DELAY,
            list_filter: ListFilter::default(),
            percentiles: crate::defaults::PERCENTILES.to_vec(),
            channel_name: crate::defaults::CHANNEL_NAME.to_string(),
            channel_category: crate::defaults::CHANNEL_CATEGORY.to_string(),
        }
    }

    /// Build the configuration for one mode from parsed CLI arguments
    pub fn from_args(args: &Args, mode: VerificationMode) -> Result<Self> {
        let config = Self {
            mode,
            peer_count: args.peers,
            tx_count: args.tx_count,
            budget: TrialBudget::new(args.period),
            prime_presence: !args.skip_presence,
            settle_delay: args.settle_delay,
            list_filter: ListFilter {
                chunk_end: args.chunk_end,
                ..ListFilter::default()
            },
            percentiles: if args.percentiles.is_empty() {
                crate::defaults::PERCENTILES.to_vec()
            } else {
                args.percentiles.clone()
            },
            channel_name: crate::defaults::CHANNEL_NAME.to_string(),
            channel_category: crate::defaults::CHANNEL_CATEGORY.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode == VerificationMode::Both {
            bail!("'Both' verification mode should be expanded before running a trial");
        }
        validate_peer_count(self.peer_count)?;
        validate_percentiles(&self.percentiles)?;
        if self.list_filter.chunk_start > self.list_filter.chunk_end {
            bail!(
                "Invalid chunk range {}..={}",
                self.list_filter.chunk_start,
                self.list_filter.chunk_end
            );
        }
        Ok(())
    }
}

/// Authoritative result of a trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    /// Poll trial: all messages sent, `delivered` listed by the receiver
    Delivered { sent: usize, delivered: usize },
    /// Notification trial: all messages sent, notifications counted per peer
    Notified { sent: usize, tally: ReceiptTally },
    /// The budget ran out before the workload was sent; nothing was verified
    CutOff { sent: usize, requested: usize },
}

impl TrialOutcome {
    /// Messages the sender got through
    pub fn sent(&self) -> usize {
        match self {
            TrialOutcome::Delivered { sent, .. }
            | TrialOutcome::Notified { sent, .. }
            | TrialOutcome::CutOff { sent, .. } => *sent,
        }
    }

    /// The trial's scalar result
    ///
    /// Delivered count for poll trials, total notifications observed for
    /// notification trials, partial sent count for cut-off trials. The
    /// notification total is summed over every receiving peer, so with `r`
    /// receivers a fully delivered workload of `n` counts `r * n`.
    pub fn count(&self) -> usize {
        match self {
            TrialOutcome::Delivered { delivered, .. } => *delivered,
            TrialOutcome::Notified { tally, .. } => tally.total(),
            TrialOutcome::CutOff { sent, .. } => *sent,
        }
    }

    pub fn is_cut_off(&self) -> bool {
        matches!(self, TrialOutcome::CutOff { .. })
    }
}

/// Everything recorded about one trial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialReport {
    /// Position of this trial within its run
    pub trial: usize,
    pub config: TrialConfig,
    pub outcome: TrialOutcome,
    pub send_metrics: SendMetrics,
    pub send_duration: Duration,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub total_duration: Duration,
}

/// Runs trials against peers from a [`PeerProvisioner`]
///
/// ```rust,no_run
/// # use p2p_tx_bench::{TrialConfig, TrialRunner, VerificationMode};
/// # use p2p_tx_bench::peer::{LocalNetwork, LocalProvisioner, PeerSettings};
/// # use p2p_tx_bench::sender::TrialBudget;
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let config = TrialConfig::new(VerificationMode::Poll, 2, 100, TrialBudget::from_millis(10_000));
/// let provisioner = LocalProvisioner::new(LocalNetwork::new(), PeerSettings::default());
/// let report = TrialRunner::new(config, provisioner).run().await?;
/// println!("delivered: {}", report.outcome.count());
/// # Ok(())
/// # }
/// ```
pub struct TrialRunner<P> {
    config: TrialConfig,
    provisioner: P,
    observer: Arc<dyn TrialObserver>,
}

impl<P: PeerProvisioner> TrialRunner<P> {
    pub fn new(config: TrialConfig, provisioner: P) -> Self {
        Self {
            config,
            provisioner,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Report trial events to `observer` instead of `tracing`
    pub fn with_observer(mut self, observer: Arc<dyn TrialObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    /// Run one complete trial
    ///
    /// Setup and transmission failures are returned as errors after every
    /// provisioned peer has been shut down. A budget cut-off is not an
    /// error: it is reported as [`TrialOutcome::CutOff`].
    pub async fn run(&self) -> Result<TrialReport> {
        self.config.validate()?;
        info!(
            "Starting {} trial: {} messages, {} peers, budget {:?}",
            self.config.mode,
            self.config.tx_count,
            self.config.peer_count,
            self.config.budget.period()
        );

        let started_at = chrono::Utc::now();
        let start = Instant::now();

        let peers = self.bring_up_peers().await?;
        let result = self.run_with_peers(&peers).await;
        self.tear_down(&peers).await;

        let (outcome, send) = result?;
        info!(
            "{} trial finished: sent {}, result {}",
            self.config.mode,
            outcome.sent(),
            outcome.count()
        );

        Ok(TrialReport {
            trial: 0,
            config: self.config.clone(),
            outcome,
            send_metrics: send.metrics,
            send_duration: send.elapsed,
            started_at,
            total_duration: start.elapsed(),
        })
    }

    /// Provision peers, shutting down the ones already up if any fails
    async fn bring_up_peers(&self) -> Result<Vec<Box<dyn Peer>>> {
        let mut peers: Vec<Box<dyn Peer>> = Vec::with_capacity(self.config.peer_count);

        for index in 0..self.config.peer_count {
            match self.provisioner.provision_peer(index).await {
                Ok(peer) => peers.push(peer),
                Err(e) => {
                    self.tear_down(&peers).await;
                    return Err(e).with_context(|| format!("Failed to provision peer {}", index));
                }
            }
        }

        self.observer.on_event(&TrialEvent::PeersReady { count: peers.len() });
        Ok(peers)
    }

    async fn run_with_peers(&self, peers: &[Box<dyn Peer>]) -> Result<(TrialOutcome, SendOutcome)> {
        if peers.len() < 2 {
            bail!("A trial needs at least 2 peers, got {}", peers.len());
        }

        let channel = self
            .provisioner
            .create_channel(
                peers[0].as_ref(),
                &self.config.channel_name,
                &self.config.channel_category,
            )
            .await
            .context("Failed to create trial channel")?;
        self.observer.on_event(&TrialEvent::ChannelCreated {
            channel: channel.to_string(),
        });

        match self.config.mode {
            VerificationMode::Poll => self.poll_trial(peers, &channel).await,
            VerificationMode::Notify => self.notification_trial(peers, &channel).await,
            VerificationMode::Both => {
                bail!("'Both' verification mode should be expanded before running a trial")
            }
        }
    }

    fn sender(&self) -> BudgetedSender<'_> {
        BudgetedSender::new(self.config.budget, self.observer.as_ref())
            .with_percentiles(self.config.percentiles.clone())
    }

    async fn poll_trial(
        &self,
        peers: &[Box<dyn Peer>],
        channel: &Channel,
    ) -> Result<(TrialOutcome, SendOutcome)> {
        let send = self
            .sender()
            .send_serially(peers[0].as_ref(), channel, self.config.tx_count, false)
            .await?;

        if !send.is_complete() {
            return Ok((self.cut_off(&send), send));
        }

        let receiver = &peers[1];
        debug!(
            "Getting messages from peer {} (should be {})",
            receiver.id(),
            send.sent
        );
        let delivered = PollVerifier::new(self.config.list_filter)
            .verify(receiver.as_ref(), channel)
            .await?;
        self.observer.on_event(&TrialEvent::MessagesListed {
            peer: receiver.id(),
            count: delivered,
        });

        Ok((
            TrialOutcome::Delivered {
                sent: send.sent,
                delivered,
            },
            send,
        ))
    }

    async fn notification_trial(
        &self,
        peers: &[Box<dyn Peer>],
        channel: &Channel,
    ) -> Result<(TrialOutcome, SendOutcome)> {
        if self.config.prime_presence {
            for peer in peers {
                peer.refresh_presence()
                    .await
                    .with_context(|| format!("Failed to refresh presence of peer {}", peer.id()))?;
                self.observer
                    .on_event(&TrialEvent::PresenceRefreshed { peer: peer.id() });
            }
            if !self.config.settle_delay.is_zero() {
                tokio::time::sleep(self.config.settle_delay).await;
            }
        }

        let verifier = NotificationVerifier::install(peers, channel, Arc::clone(&self.observer));
        let send = self
            .sender()
            .send_serially(peers[0].as_ref(), channel, self.config.tx_count, true)
            .await?;

        if !send.is_complete() {
            return Ok((self.cut_off(&send), send));
        }

        let tally = verifier.finish(self.observer.as_ref());
        Ok((
            TrialOutcome::Notified {
                sent: send.sent,
                tally,
            },
            send,
        ))
    }

    fn cut_off(&self, send: &SendOutcome) -> TrialOutcome {
        self.observer.on_event(&TrialEvent::VerificationSkipped {
            sent: send.sent,
            requested: send.requested,
        });
        TrialOutcome::CutOff {
            sent: send.sent,
            requested: send.requested,
        }
    }

    /// Shut down every peer once; failures are reported, not returned
    async fn tear_down(&self, peers: &[Box<dyn Peer>]) {
        for peer in peers {
            match peer.shutdown().await {
                Ok(()) => self
                    .observer
                    .on_event(&TrialEvent::PeerShutdown { peer: peer.id() }),
                Err(e) => self.observer.on_event(&TrialEvent::TeardownFailed {
                    peer: peer.id(),
                    error: e.to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use crate::peer::{LocalNetwork, LocalProvisioner, PeerSettings};

    fn fast_config(mode: VerificationMode, tx_count: usize) -> TrialConfig {
        let mut config = TrialConfig::new(mode, 2, tx_count, TrialBudget::from_millis(60_000));
        config.settle_delay = Duration::ZERO;
        config
    }

    #[test]
    fn test_config_from_args() {
        let args = Args {
            modes: vec![VerificationMode::Notify],
            peers: 3,
            tx_count: 25,
            period: Duration::from_millis(500),
            trials: 1,
            settle_delay: Duration::from_millis(10),
            chunk_end: 4,
            percentiles: vec![50.0],
            ..Default::default()
        };

        let config = TrialConfig::from_args(&args, VerificationMode::Notify).unwrap();
        assert_eq!(config.peer_count, 3);
        assert_eq!(config.tx_count, 25);
        assert_eq!(config.budget.period(), Duration::from_millis(500));
        assert!(config.prime_presence);
        assert_eq!(config.list_filter.chunk_end, 4);
        assert_eq!(config.percentiles, vec![50.0]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = fast_config(VerificationMode::Poll, 1);
        assert!(config.validate().is_ok());

        config.peer_count = 1;
        assert!(config.validate().is_err());

        let config = fast_config(VerificationMode::Both, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_outcome_counts() {
        let delivered = TrialOutcome::Delivered {
            sent: 5,
            delivered: 4,
        };
        assert_eq!(delivered.sent(), 5);
        assert_eq!(delivered.count(), 4);

        let tally: ReceiptTally = vec![(1, 3), (2, 2)].into_iter().collect();
        let notified = TrialOutcome::Notified { sent: 3, tally };
        assert_eq!(notified.count(), 5);

        let cut = TrialOutcome::CutOff {
            sent: 1,
            requested: 10,
        };
        assert!(cut.is_cut_off());
        assert_eq!(cut.count(), 1);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(TrialOutcome::CutOff {
            sent: 1,
            requested: 10,
        })
        .unwrap();
        assert_eq!(json["cut_off"]["sent"], 1);

        let tally: ReceiptTally = vec![(1, 3), (2, 2)].into_iter().collect();
        let notified = TrialOutcome::Notified { sent: 3, tally };
        let text = serde_json::to_string(&notified).unwrap();
        let parsed: TrialOutcome = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, notified);
    }

    #[tokio::test]
    async fn test_poll_trial_on_local_network() {
        let provisioner = LocalProvisioner::new(LocalNetwork::new(), PeerSettings::default());
        let observer = Arc::new(RecordingObserver::new());
        let runner = TrialRunner::new(fast_config(VerificationMode::Poll, 5), provisioner)
            .with_observer(observer.clone());

        let report = runner.run().await.unwrap();

        assert_eq!(
            report.outcome,
            TrialOutcome::Delivered {
                sent: 5,
                delivered: 5
            }
        );
        assert_eq!(report.send_metrics.throughput.total_messages, 5);
        assert_eq!(runner.provisioner().network().live_peers(), 0);
        assert_eq!(
            observer.count(|e| matches!(e, TrialEvent::PeerShutdown { .. })),
            2
        );
    }

    #[tokio::test]
    async fn test_notification_trial_skips_presence_when_disabled() {
        let provisioner = LocalProvisioner::new(LocalNetwork::new(), PeerSettings::default());
        let mut config = fast_config(VerificationMode::Notify, 3);
        config.prime_presence = false;
        let runner = TrialRunner::new(config, provisioner);

        let report = runner.run().await.unwrap();

        match report.outcome {
            TrialOutcome::Notified { sent, tally } => {
                assert_eq!(sent, 3);
                // Nobody refreshed presence, so nobody was signalled.
                assert!(tally.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
