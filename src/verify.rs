//! # Delivery Verification
//!
//! Two ways of confirming that sent messages reached other peers:
//!
//! - [`PollVerifier`] asks a receiving peer for its message log once sending
//!   has finished and counts the entries. It is a snapshot read: no waiting
//!   for convergence, no retry.
//! - [`NotificationVerifier`] subscribes to every peer's notification stream
//!   before sending starts. One consumer task per peer drains that peer's
//!   stream into its own counter while the sender runs, so no state is shared
//!   between peers. When sending is over the verifier reports whatever has
//!   been counted at that instant as a [`ReceiptTally`].

use crate::{
    events::{TrialEvent, TrialObserver},
    peer::{Channel, ListFilter, Peer, PeerId, ReceivingEndpoint},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Counts a receiver's message log for a channel
#[derive(Debug, Clone, Default)]
pub struct PollVerifier {
    filter: ListFilter,
}

impl PollVerifier {
    pub fn new(filter: ListFilter) -> Self {
        Self { filter }
    }

    /// Number of messages `receiver` currently lists for `channel`
    pub async fn verify<R>(&self, receiver: &R, channel: &Channel) -> Result<usize>
    where
        R: ReceivingEndpoint + ?Sized,
    {
        let listed = receiver
            .list_messages(channel, &self.filter)
            .await
            .context("Failed to list messages on receiving peer")?;
        Ok(listed.messages.len())
    }
}

/// Notifications counted per receiving peer
///
/// Peers that never observed a notification have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptTally {
    counts: BTreeMap<PeerId, usize>,
}

impl ReceiptTally {
    /// Notifications counted for `peer`, zero when absent
    pub fn get(&self, peer: PeerId) -> usize {
        self.counts.get(&peer).copied().unwrap_or(0)
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.counts.contains_key(&peer)
    }

    /// Sum over all peers
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Number of peers that observed at least one notification
    pub fn peers_reached(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, usize)> + '_ {
        self.counts.iter().map(|(peer, count)| (*peer, *count))
    }
}

impl FromIterator<(PeerId, usize)> for ReceiptTally {
    fn from_iter<I: IntoIterator<Item = (PeerId, usize)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().filter(|(_, count)| *count > 0).collect(),
        }
    }
}

impl fmt::Display for ReceiptTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (peer, count)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "peer {}: {}", peer, count)?;
        }
        write!(f, "}}")
    }
}

/// Listens for delivery notifications on every peer of a trial
///
/// Must be installed from within a Tokio runtime. Dropping the verifier
/// stops its consumer tasks.
pub struct NotificationVerifier {
    counters: BTreeMap<PeerId, Arc<AtomicUsize>>,
    consumers: Vec<JoinHandle<()>>,
}

impl NotificationVerifier {
    /// Subscribe to each peer's notifications for `channel`
    pub fn install(
        peers: &[Box<dyn Peer>],
        channel: &Channel,
        observer: Arc<dyn TrialObserver>,
    ) -> Self {
        let mut counters = BTreeMap::new();
        let mut consumers = Vec::with_capacity(peers.len());

        for peer in peers {
            let peer_id = peer.id();
            let counter = Arc::new(AtomicUsize::new(0));
            let mut stream = peer.subscribe_notifications();
            let task_counter = Arc::clone(&counter);
            let observer = Arc::clone(&observer);
            let channel_id = channel.id;

            consumers.push(tokio::spawn(async move {
                while let Some(notification) = stream.recv().await {
                    if notification.channel.id != channel_id {
                        continue;
                    }
                    let total = task_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    observer.on_event(&TrialEvent::NotificationReceived {
                        peer: peer_id,
                        total,
                    });
                }
                debug!("Notification stream for peer {} closed", peer_id);
            }));
            counters.insert(peer_id, counter);
        }

        Self {
            counters,
            consumers,
        }
    }

    /// Tallies accumulated so far, without waiting for pending notifications
    pub fn snapshot(&self) -> ReceiptTally {
        self.counters
            .iter()
            .map(|(peer, counter)| (*peer, counter.load(Ordering::SeqCst)))
            .collect()
    }

    /// Take the final snapshot and stop listening
    pub fn finish(self, observer: &dyn TrialObserver) -> ReceiptTally {
        let tally = self.snapshot();
        observer.on_event(&TrialEvent::TallyReported {
            tally: tally.clone(),
        });
        tally
    }
}

impl Drop for NotificationVerifier {
    fn drop(&mut self) {
        for consumer in &self.consumers {
            consumer.abort();
        }
    }
}
