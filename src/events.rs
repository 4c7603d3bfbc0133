//! # Trial Events
//!
//! The sender, the verifiers and the orchestrator report progress as
//! [`TrialEvent`]s to a [`TrialObserver`] instead of printing. Observers are
//! purely informational: nothing they do can change a trial's outcome.
//!
//! - [`TracingObserver`] turns events into structured `tracing` records and
//!   is what the binary uses.
//! - [`RecordingObserver`] keeps every event in memory, which is handy for
//!   assertions in tests and for post-run inspection.

use crate::peer::{PeerId, SignalReceipt};
use crate::verify::ReceiptTally;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something that happened during a trial
#[derive(Debug, Clone, PartialEq)]
pub enum TrialEvent {
    /// All peers were provisioned
    PeersReady { count: usize },
    /// The trial channel exists
    ChannelCreated { channel: String },
    /// A peer was primed as an active chatter
    PresenceRefreshed { peer: PeerId },
    /// The sender is about to transmit message `index`
    Sending { index: usize },
    /// Message `index` was acknowledged by the sending peer
    MessageSent { index: usize, latency: Duration },
    /// The notification for message `index` was broadcast
    NotificationSent { index: usize, receipt: SignalReceipt },
    /// The budget ran out after `sent` of `requested` messages
    BudgetExhausted {
        sent: usize,
        requested: usize,
        elapsed: Duration,
    },
    /// The whole workload was sent within the budget
    SendCompleted { sent: usize, elapsed: Duration },
    /// Verification did not run because sending was cut off
    VerificationSkipped { sent: usize, requested: usize },
    /// A receiving peer reported its message log
    MessagesListed { peer: PeerId, count: usize },
    /// A notification was counted for `peer`
    NotificationReceived { peer: PeerId, total: usize },
    /// Tallies observed when sending finished
    TallyReported { tally: ReceiptTally },
    /// A peer was released
    PeerShutdown { peer: PeerId },
    /// Releasing a peer failed
    TeardownFailed { peer: PeerId, error: String },
}

/// Receiver of trial events
///
/// Implementations must be cheap and must not block: events are emitted
/// from inside the sender loop and from notification consumer tasks.
pub trait TrialObserver: Send + Sync {
    fn on_event(&self, event: &TrialEvent);
}

/// Observer that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl TrialObserver for NullObserver {
    fn on_event(&self, _event: &TrialEvent) {}
}

/// Observer that forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TrialObserver for TracingObserver {
    fn on_event(&self, event: &TrialEvent) {
        match event {
            TrialEvent::PeersReady { count } => info!(peers = count, "Peers ready"),
            TrialEvent::ChannelCreated { channel } => info!("Created channel {}", channel),
            TrialEvent::PresenceRefreshed { peer } => debug!(peer, "Refreshed presence"),
            TrialEvent::Sending { index } => debug!(index, "Sending message {}", index),
            TrialEvent::MessageSent { index, latency } => {
                debug!(index, latency_us = latency.as_micros() as u64, "Message acknowledged")
            }
            TrialEvent::NotificationSent { index, receipt } => debug!(
                index,
                total = receipt.total,
                active = receipt.active,
                sent = receipt.sent,
                "Signal results"
            ),
            TrialEvent::BudgetExhausted {
                sent,
                requested,
                elapsed,
            } => warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                "Couldn't send all messages in period, sent {} of {}", sent, requested
            ),
            TrialEvent::SendCompleted { sent, elapsed } => info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "Sent all {} messages", sent
            ),
            TrialEvent::VerificationSkipped { sent, requested } => info!(
                "Skipping verification, only {} of {} messages were sent",
                sent, requested
            ),
            TrialEvent::MessagesListed { peer, count } => {
                info!(peer, "Receiver got {} messages", count)
            }
            TrialEvent::NotificationReceived { peer, total } => {
                debug!(peer, total, "Received signal")
            }
            TrialEvent::TallyReported { tally } => {
                info!("Signals received: {}", tally)
            }
            TrialEvent::PeerShutdown { peer } => debug!(peer, "Peer shut down"),
            TrialEvent::TeardownFailed { peer, error } => {
                warn!(peer, "Failed to shut down peer: {}", error)
            }
        }
    }
}

/// Observer that stores every event it sees
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<TrialEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<TrialEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `predicate`
    pub fn count(&self, predicate: impl Fn(&TrialEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl TrialObserver for RecordingObserver {
    fn on_event(&self, event: &TrialEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        observer.on_event(&TrialEvent::Sending { index: 0 });
        observer.on_event(&TrialEvent::MessageSent {
            index: 0,
            latency: Duration::from_millis(2),
        });
        observer.on_event(&TrialEvent::Sending { index: 1 });

        let events = observer.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], TrialEvent::Sending { index: 0 });
        assert_eq!(
            observer.count(|e| matches!(e, TrialEvent::Sending { .. })),
            2
        );
    }

    #[test]
    fn test_tracing_observer_accepts_every_event() {
        let observer = TracingObserver;
        observer.on_event(&TrialEvent::PeersReady { count: 2 });
        observer.on_event(&TrialEvent::BudgetExhausted {
            sent: 1,
            requested: 10,
            elapsed: Duration::from_millis(50),
        });
        observer.on_event(&TrialEvent::TallyReported {
            tally: ReceiptTally::default(),
        });
    }
}
