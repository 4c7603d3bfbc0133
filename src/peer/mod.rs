//! # Peer Collaborator Interfaces
//!
//! The benchmark never talks to a messaging node directly. Everything it
//! needs from a provisioned peer is expressed through the traits in this
//! module, so the trial logic can run unchanged against real nodes, the
//! in-process [`memory`] network, or scripted test doubles.
//!
//! - [`SendingEndpoint`]: persist a message, broadcast a notification for it
//! - [`ReceivingEndpoint`]: snapshot query of a channel's message log
//! - [`Peer`]: both endpoints plus the lifecycle (presence, notifications, shutdown)
//! - [`PeerProvisioner`]: brings peers up and creates the trial channel

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

pub mod memory;

pub use memory::{LocalNetwork, LocalPeer, LocalProvisioner, PeerSettings};

/// Identifier of a peer within one trial (its provisioning index)
pub type PeerId = u64;

/// A logical chat channel that unit messages are posted against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub category: String,
    pub display_name: String,
}

impl Channel {
    /// Create a channel with a fresh identifier
    pub fn new(category: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: category.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.category, self.display_name, self.id)
    }
}

/// One message of the synthetic workload
///
/// Built by the workload generator right before it is sent and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMessage {
    pub id: Uuid,
    pub sequence_index: usize,
    pub content: String,
    pub channel: Channel,
}

impl UnitMessage {
    /// Payload size used for throughput accounting
    pub fn size(&self) -> usize {
        16 + // id
        8 + // sequence index
        self.content.len()
    }
}

/// The record a peer keeps for a persisted message
///
/// Returned by [`SendingEndpoint::send`] as the acknowledgment, and by
/// [`ReceivingEndpoint::list_messages`] as the listed entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: Uuid,
    pub entry_hash: String,
    pub content: String,
    pub author: PeerId,
    pub chunk: u32,
    pub created_at: DateTime<Utc>,
}

/// Fan-out statistics returned by a notification broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalReceipt {
    /// Chatters known to the sending peer
    pub total: usize,
    /// Chatters considered active (excluding the sender)
    pub active: usize,
    /// Chatters the notification was actually delivered to
    pub sent: usize,
}

/// Filter options for [`ReceivingEndpoint::list_messages`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    pub active_chatter: bool,
    pub chunk_start: u32,
    /// Inclusive
    pub chunk_end: u32,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            active_chatter: false,
            chunk_start: 0,
            chunk_end: 1,
        }
    }
}

/// Result of a message log query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageList {
    pub messages: Vec<MessageRecord>,
}

/// A push-delivered notification observed by a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Peer that broadcast the notification
    pub from: PeerId,
    pub message: MessageRecord,
    pub channel: Channel,
}

/// Failures surfaced by peer collaborators
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// A send or notify call failed or the connection dropped
    #[error("transmission failed on peer {peer}: {reason}")]
    Transmission { peer: PeerId, reason: String },

    /// The peer refused the request
    #[error("peer {peer} rejected the request: {reason}")]
    Rejected { peer: PeerId, reason: String },

    /// Provisioning or channel creation failed
    #[error("setup failed: {0}")]
    Setup(String),

    /// The peer has already been shut down
    #[error("peer {0} is shut down")]
    ShutDown(PeerId),
}

/// Capability to write into the messaging application
#[async_trait]
pub trait SendingEndpoint: Send + Sync {
    /// Persist a message against its channel and return the peer's record of it
    async fn send(&self, message: &UnitMessage) -> Result<MessageRecord, PeerError>;

    /// Broadcast a lightweight signal referencing an already-sent message
    async fn notify(
        &self,
        message: &MessageRecord,
        channel: &Channel,
    ) -> Result<SignalReceipt, PeerError>;
}

/// Capability to read a channel's persisted message log
#[async_trait]
pub trait ReceivingEndpoint: Send + Sync {
    async fn list_messages(
        &self,
        channel: &Channel,
        filter: &ListFilter,
    ) -> Result<MessageList, PeerError>;
}

/// A provisioned peer node taking part in a trial
#[async_trait]
pub trait Peer: SendingEndpoint + ReceivingEndpoint {
    /// Identity used for receipt tallies and logging
    fn id(&self) -> PeerId;

    /// Open a stream of push notifications delivered to this peer
    ///
    /// Events fire zero or more times for the life of the peer connection
    /// and the stream ends when the peer shuts down.
    fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<Notification>;

    /// Mark this peer as an active chatter so it receives notifications
    async fn refresh_presence(&self) -> Result<(), PeerError>;

    /// Release the peer's resources
    async fn shutdown(&self) -> Result<(), PeerError>;
}

/// Brings peers up and creates the channel a trial runs against
#[async_trait]
pub trait PeerProvisioner: Send + Sync {
    /// Provision the peer with the given index
    async fn provision_peer(&self, index: usize) -> Result<Box<dyn Peer>, PeerError>;

    /// Create the trial channel through `creator`
    async fn create_channel(
        &self,
        creator: &dyn Peer,
        display_name: &str,
        category: &str,
    ) -> Result<Channel, PeerError>;
}
