use anyhow::Result;
use async_trait::async_trait;
use p2p_tx_bench::peer::{
    Channel, ListFilter, MessageList, MessageRecord, Notification, Peer, PeerError, PeerId,
    PeerProvisioner, ReceivingEndpoint, SendingEndpoint, SignalReceipt, UnitMessage,
};
use p2p_tx_bench::{TrialBudget, TrialConfig, TrialOutcome, TrialRunner, VerificationMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Call counters shared by every stub peer of one trial
struct Probe {
    sends: AtomicUsize,
    notifies: AtomicUsize,
    lists: AtomicUsize,
    shutdowns: Vec<AtomicUsize>,
}

impl Probe {
    fn new(peers: usize) -> Arc<Self> {
        Arc::new(Self {
            sends: AtomicUsize::new(0),
            notifies: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            shutdowns: (0..peers).map(|_| AtomicUsize::new(0)).collect(),
        })
    }

    fn shutdowns(&self) -> Vec<usize> {
        self.shutdowns
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .collect()
    }
}

#[derive(Clone, Default)]
struct Script {
    send_delay: Duration,
    fail_send_at: Option<usize>,
    fail_provision_at: Option<usize>,
    fail_channel: bool,
}

struct StubPeer {
    id: PeerId,
    probe: Arc<Probe>,
    script: Script,
}

#[async_trait]
impl SendingEndpoint for StubPeer {
    async fn send(&self, message: &UnitMessage) -> Result<MessageRecord, PeerError> {
        if !self.script.send_delay.is_zero() {
            tokio::time::sleep(self.script.send_delay).await;
        }
        if self.script.fail_send_at == Some(message.sequence_index) {
            return Err(PeerError::Transmission {
                peer: self.id,
                reason: "connection dropped".to_string(),
            });
        }
        self.probe.sends.fetch_add(1, Ordering::SeqCst);
        Ok(MessageRecord {
            message_id: message.id,
            entry_hash: format!("entry-{}", message.sequence_index),
            content: message.content.clone(),
            author: self.id,
            chunk: 0,
            created_at: chrono::Utc::now(),
        })
    }

    async fn notify(
        &self,
        _message: &MessageRecord,
        _channel: &Channel,
    ) -> Result<SignalReceipt, PeerError> {
        self.probe.notifies.fetch_add(1, Ordering::SeqCst);
        Ok(SignalReceipt::default())
    }
}

#[async_trait]
impl ReceivingEndpoint for StubPeer {
    async fn list_messages(
        &self,
        _channel: &Channel,
        _filter: &ListFilter,
    ) -> Result<MessageList, PeerError> {
        self.probe.lists.fetch_add(1, Ordering::SeqCst);
        let stored = self.probe.sends.load(Ordering::SeqCst);
        Ok(MessageList {
            messages: (0..stored)
                .map(|i| MessageRecord {
                    message_id: uuid::Uuid::new_v4(),
                    entry_hash: format!("entry-{}", i),
                    content: format!("message {}", i),
                    author: 0,
                    chunk: 0,
                    created_at: chrono::Utc::now(),
                })
                .collect(),
        })
    }
}

#[async_trait]
impl Peer for StubPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    async fn refresh_presence(&self) -> Result<(), PeerError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PeerError> {
        self.probe.shutdowns[self.id as usize].fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubProvisioner {
    probe: Arc<Probe>,
    script: Script,
}

#[async_trait]
impl PeerProvisioner for StubProvisioner {
    async fn provision_peer(&self, index: usize) -> Result<Box<dyn Peer>, PeerError> {
        if self.script.fail_provision_at == Some(index) {
            return Err(PeerError::Setup(format!("peer {} did not start", index)));
        }
        Ok(Box::new(StubPeer {
            id: index as PeerId,
            probe: Arc::clone(&self.probe),
            script: self.script.clone(),
        }))
    }

    async fn create_channel(
        &self,
        _creator: &dyn Peer,
        display_name: &str,
        category: &str,
    ) -> Result<Channel, PeerError> {
        if self.script.fail_channel {
            return Err(PeerError::Setup("channel creation refused".to_string()));
        }
        Ok(Channel::new(category, display_name))
    }
}

fn runner(
    mode: VerificationMode,
    peers: usize,
    tx_count: usize,
    budget_ms: u64,
    script: Script,
) -> (TrialRunner<StubProvisioner>, Arc<Probe>) {
    let probe = Probe::new(peers);
    let mut config = TrialConfig::new(mode, peers, tx_count, TrialBudget::from_millis(budget_ms));
    config.settle_delay = Duration::ZERO;
    let provisioner = StubProvisioner {
        probe: Arc::clone(&probe),
        script,
    };
    (TrialRunner::new(config, provisioner), probe)
}

#[tokio::test]
async fn poll_trial_reports_every_message_when_budget_is_generous() -> Result<()> {
    let (runner, probe) = runner(VerificationMode::Poll, 2, 5, 60_000, Script::default());

    let report = runner.run().await?;

    assert_eq!(
        report.outcome,
        TrialOutcome::Delivered {
            sent: 5,
            delivered: 5
        }
    );
    assert_eq!(probe.lists.load(Ordering::SeqCst), 1);
    assert_eq!(probe.notifies.load(Ordering::SeqCst), 0);
    assert_eq!(probe.shutdowns(), vec![1, 1]);
    Ok(())
}

#[tokio::test]
async fn slow_sends_are_cut_off_after_the_first_message() -> Result<()> {
    let script = Script {
        send_delay: Duration::from_millis(50),
        ..Script::default()
    };
    let (runner, probe) = runner(VerificationMode::Poll, 2, 10, 1, script);

    let report = runner.run().await?;

    assert_eq!(
        report.outcome,
        TrialOutcome::CutOff {
            sent: 1,
            requested: 10
        }
    );
    assert_eq!(report.outcome.count(), 1);
    assert_eq!(probe.sends.load(Ordering::SeqCst), 1);
    // Verification never runs after a cut-off.
    assert_eq!(probe.lists.load(Ordering::SeqCst), 0);
    assert_eq!(probe.shutdowns(), vec![1, 1]);
    Ok(())
}

#[tokio::test]
async fn zero_budget_still_sends_one_message() -> Result<()> {
    let (runner, probe) = runner(VerificationMode::Notify, 2, 10, 0, Script::default());

    let report = runner.run().await?;

    assert_eq!(report.outcome.sent(), 1);
    assert!(report.outcome.is_cut_off());
    assert_eq!(probe.notifies.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn empty_workload_is_verified_immediately() -> Result<()> {
    let (runner, probe) = runner(VerificationMode::Poll, 2, 0, 60_000, Script::default());

    let report = runner.run().await?;

    assert_eq!(
        report.outcome,
        TrialOutcome::Delivered {
            sent: 0,
            delivered: 0
        }
    );
    assert_eq!(probe.lists.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn notification_trial_sends_one_signal_per_message() -> Result<()> {
    let (runner, probe) = runner(VerificationMode::Notify, 3, 4, 60_000, Script::default());

    let report = runner.run().await?;

    match report.outcome {
        TrialOutcome::Notified { sent, tally } => {
            assert_eq!(sent, 4);
            // Stub peers never deliver notifications.
            assert!(tally.is_empty());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(probe.notifies.load(Ordering::SeqCst), 4);
    assert_eq!(probe.lists.load(Ordering::SeqCst), 0);
    assert_eq!(probe.shutdowns(), vec![1, 1, 1]);
    Ok(())
}

#[tokio::test]
async fn send_failure_propagates_after_teardown() {
    let script = Script {
        fail_send_at: Some(3),
        ..Script::default()
    };
    let (runner, probe) = runner(VerificationMode::Poll, 3, 10, 60_000, script);

    let err = runner.run().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PeerError>(),
        Some(PeerError::Transmission { peer: 0, .. })
    ));
    assert_eq!(probe.sends.load(Ordering::SeqCst), 3);
    assert_eq!(probe.lists.load(Ordering::SeqCst), 0);
    assert_eq!(probe.shutdowns(), vec![1, 1, 1]);
}

#[tokio::test]
async fn provisioning_failure_shuts_down_peers_already_started() {
    let script = Script {
        fail_provision_at: Some(2),
        ..Script::default()
    };
    let (runner, probe) = runner(VerificationMode::Poll, 4, 10, 60_000, script);

    let err = runner.run().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PeerError>(),
        Some(PeerError::Setup(_))
    ));
    assert_eq!(probe.sends.load(Ordering::SeqCst), 0);
    assert_eq!(probe.shutdowns(), vec![1, 1, 0, 0]);
}

#[tokio::test]
async fn channel_failure_shuts_down_every_peer() {
    let script = Script {
        fail_channel: true,
        ..Script::default()
    };
    let (runner, probe) = runner(VerificationMode::Notify, 3, 10, 60_000, script);

    assert!(runner.run().await.is_err());
    assert_eq!(probe.sends.load(Ordering::SeqCst), 0);
    assert_eq!(probe.shutdowns(), vec![1, 1, 1]);
}
