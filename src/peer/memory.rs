//! In-process messaging network
//!
//! A small stand-in for a provisioned chat application: peers attached to
//! the same [`LocalNetwork`] share a channel store, gossip messages to each
//! other after a configurable delay, and deliver notifications to every
//! peer that has refreshed its presence. Send latency, jitter and send
//! failures can be injected so trials can be exercised end-to-end without
//! external nodes.

use super::{
    Channel, ListFilter, MessageList, MessageRecord, Notification, Peer, PeerError, PeerId,
    PeerProvisioner, ReceivingEndpoint, SendingEndpoint, SignalReceipt, UnitMessage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Behaviour knobs for peers created on a [`LocalNetwork`]
#[derive(Debug, Clone, Default)]
pub struct PeerSettings {
    /// Simulated latency of every send/notify call
    pub send_latency: Duration,
    /// Upper bound of random extra latency added to `send_latency`
    pub jitter: Duration,
    /// Delay before a message becomes visible to peers other than its author
    pub gossip_delay: Duration,
    /// Chunk new messages are stored under
    pub chunk: u32,
    /// Fail every send after this many successful ones
    pub fail_sends_after: Option<usize>,
}

struct StoredMessage {
    record: MessageRecord,
    visible_at: Instant,
}

#[derive(Default)]
struct NetworkState {
    channels: Mutex<HashMap<Uuid, Channel>>,
    messages: Mutex<HashMap<Uuid, BTreeMap<u32, Vec<StoredMessage>>>>,
    chatters: Mutex<BTreeSet<PeerId>>,
    subscribers: Mutex<HashMap<PeerId, Vec<mpsc::UnboundedSender<Notification>>>>,
    live_peers: Mutex<BTreeSet<PeerId>>,
}

/// Shared medium that [`LocalPeer`]s communicate through
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<NetworkState>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new peer to the network
    pub fn join(&self, id: PeerId, settings: PeerSettings) -> LocalPeer {
        self.state.live_peers.lock().insert(id);
        debug!("Peer {} joined local network", id);
        LocalPeer {
            id,
            network: self.clone(),
            settings,
            sends: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Number of peers that joined and have not shut down yet
    pub fn live_peers(&self) -> usize {
        self.state.live_peers.lock().len()
    }

    /// Number of messages stored for a channel across all chunks
    pub fn stored_messages(&self, channel: &Channel) -> usize {
        self.state
            .messages
            .lock()
            .get(&channel.id)
            .map(|chunks| chunks.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn register_channel(&self, channel: Channel) {
        self.state.channels.lock().insert(channel.id, channel);
    }

    fn has_channel(&self, channel: &Channel) -> bool {
        self.state.channels.lock().contains_key(&channel.id)
    }
}

/// A peer living on a [`LocalNetwork`]
pub struct LocalPeer {
    id: PeerId,
    network: LocalNetwork,
    settings: PeerSettings,
    sends: AtomicUsize,
    shut_down: AtomicBool,
}

impl LocalPeer {
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), PeerError> {
        if self.is_shut_down() {
            Err(PeerError::ShutDown(self.id))
        } else {
            Ok(())
        }
    }

    async fn simulate_latency(&self) {
        let mut latency = self.settings.send_latency;
        if !self.settings.jitter.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=self.settings.jitter.as_micros() as u64);
            latency += Duration::from_micros(extra);
        }

        if latency.is_zero() {
            // Still a suspension point, like any network call.
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl SendingEndpoint for LocalPeer {
    async fn send(&self, message: &UnitMessage) -> Result<MessageRecord, PeerError> {
        self.ensure_live()?;
        self.simulate_latency().await;
        self.ensure_live()?;

        if let Some(limit) = self.settings.fail_sends_after {
            if self.sends.load(Ordering::SeqCst) >= limit {
                return Err(PeerError::Transmission {
                    peer: self.id,
                    reason: format!("connection dropped after {} sends", limit),
                });
            }
        }

        if !self.network.has_channel(&message.channel) {
            return Err(PeerError::Rejected {
                peer: self.id,
                reason: format!("unknown channel {}", message.channel.id),
            });
        }

        let record = MessageRecord {
            message_id: message.id,
            entry_hash: format!("uhCEk{}", Uuid::new_v4().simple()),
            content: message.content.clone(),
            author: self.id,
            chunk: self.settings.chunk,
            created_at: chrono::Utc::now(),
        };

        self.network
            .state
            .messages
            .lock()
            .entry(message.channel.id)
            .or_default()
            .entry(self.settings.chunk)
            .or_default()
            .push(StoredMessage {
                record: record.clone(),
                visible_at: Instant::now() + self.settings.gossip_delay,
            });
        self.sends.fetch_add(1, Ordering::SeqCst);

        trace!("Peer {} stored message {}", self.id, message.sequence_index);
        Ok(record)
    }

    async fn notify(
        &self,
        message: &MessageRecord,
        channel: &Channel,
    ) -> Result<SignalReceipt, PeerError> {
        self.ensure_live()?;
        self.simulate_latency().await;
        self.ensure_live()?;

        let chatters: Vec<PeerId> = self.network.state.chatters.lock().iter().copied().collect();
        let mut receipt = SignalReceipt {
            total: chatters.len(),
            ..Default::default()
        };

        let mut subscribers = self.network.state.subscribers.lock();
        for chatter in chatters.into_iter().filter(|c| *c != self.id) {
            // Agents that were not signalled still count as active.
            receipt.active += 1;

            let notification = Notification {
                from: self.id,
                message: message.clone(),
                channel: channel.clone(),
            };
            let delivered = match subscribers.get_mut(&chatter) {
                Some(streams) => {
                    streams.retain(|tx| tx.send(notification.clone()).is_ok());
                    !streams.is_empty()
                }
                None => false,
            };
            if delivered {
                receipt.sent += 1;
            }
        }
        drop(subscribers);

        Ok(receipt)
    }
}

#[async_trait]
impl ReceivingEndpoint for LocalPeer {
    async fn list_messages(
        &self,
        channel: &Channel,
        filter: &ListFilter,
    ) -> Result<MessageList, PeerError> {
        self.ensure_live()?;
        self.simulate_latency().await;

        if filter.active_chatter {
            self.network.state.chatters.lock().insert(self.id);
        }

        let now = Instant::now();
        let mut messages: Vec<MessageRecord> = {
            let store = self.network.state.messages.lock();
            match store.get(&channel.id) {
                Some(chunks) => chunks
                    .range(filter.chunk_start..=filter.chunk_end)
                    .flat_map(|(_, stored)| stored.iter())
                    .filter(|m| m.record.author == self.id || m.visible_at <= now)
                    .map(|m| m.record.clone())
                    .collect(),
                None => Vec::new(),
            }
        };
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(MessageList { messages })
    }
}

#[async_trait]
impl Peer for LocalPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_shut_down() {
            self.network
                .state
                .subscribers
                .lock()
                .entry(self.id)
                .or_default()
                .push(tx);
        }
        rx
    }

    async fn refresh_presence(&self) -> Result<(), PeerError> {
        self.ensure_live()?;
        self.network.state.chatters.lock().insert(self.id);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PeerError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Err(PeerError::ShutDown(self.id));
        }

        let state = &self.network.state;
        state.subscribers.lock().remove(&self.id);
        state.chatters.lock().remove(&self.id);
        state.live_peers.lock().remove(&self.id);
        debug!("Peer {} shut down", self.id);
        Ok(())
    }
}

/// Provisions [`LocalPeer`]s on a shared [`LocalNetwork`]
pub struct LocalProvisioner {
    network: LocalNetwork,
    settings: PeerSettings,
    sender_settings: Option<PeerSettings>,
    fail_at: Option<usize>,
}

impl LocalProvisioner {
    pub fn new(network: LocalNetwork, settings: PeerSettings) -> Self {
        Self {
            network,
            settings,
            sender_settings: None,
            fail_at: None,
        }
    }

    /// Use different settings for peer 0, the one the trial sends through
    pub fn with_sender_settings(mut self, settings: PeerSettings) -> Self {
        self.sender_settings = Some(settings);
        self
    }

    /// Make provisioning of the peer with this index fail
    pub fn fail_provisioning_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }
}

#[async_trait]
impl PeerProvisioner for LocalProvisioner {
    async fn provision_peer(&self, index: usize) -> Result<Box<dyn Peer>, PeerError> {
        if self.fail_at == Some(index) {
            return Err(PeerError::Setup(format!(
                "failed to install application on peer {}",
                index
            )));
        }

        let settings = match (&self.sender_settings, index) {
            (Some(sender), 0) => sender.clone(),
            _ => self.settings.clone(),
        };
        Ok(Box::new(self.network.join(index as PeerId, settings)))
    }

    async fn create_channel(
        &self,
        creator: &dyn Peer,
        display_name: &str,
        category: &str,
    ) -> Result<Channel, PeerError> {
        if !self.network.state.live_peers.lock().contains(&creator.id()) {
            return Err(PeerError::Setup(format!(
                "peer {} cannot create a channel",
                creator.id()
            )));
        }

        let channel = Channel::new(category, display_name);
        self.network.register_channel(channel.clone());
        debug!("Peer {} created channel {}", creator.id(), channel);
        Ok(channel)
    }
}
