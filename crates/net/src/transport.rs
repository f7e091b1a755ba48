//! The seam between protocols and whatever moves their bytes.
//!
//! A session layer owns the actual connections and implements [`Network`]; protocols only
//! ask whether a remote is connected and hand over framed messages.

use crate::error::TransportError;
use livecapture_core::ChannelType;
use std::net::SocketAddr;
use uuid::Uuid;

/// Identity of a connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Remote {
    /// Stable identifier of the peer process.
    pub id: Uuid,
    /// Reliable endpoint, if the peer accepts TCP.
    pub tcp: Option<SocketAddr>,
    /// Unreliable endpoint, if the peer accepts UDP.
    pub udp: Option<SocketAddr>,
}

impl Remote {
    /// Create a remote with no known endpoints.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            tcp: None,
            udp: None,
        }
    }
}

/// A framed message on its way to a remote: `[code: u16][payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination.
    pub remote: Remote,
    /// Delivery channel.
    pub channel: ChannelType,
    /// Framed bytes.
    pub data: Vec<u8>,
}

/// A framed message received from a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender.
    pub remote: Remote,
    /// Channel it arrived on.
    pub channel: ChannelType,
    /// Framed bytes.
    pub data: Vec<u8>,
}

impl From<OutboundMessage> for InboundMessage {
    fn from(message: OutboundMessage) -> Self {
        Self {
            remote: message.remote,
            channel: message.channel,
            data: message.data,
        }
    }
}

/// Transport used by a [`Protocol`](crate::Protocol) to reach its remote.
pub trait Network: Send + Sync {
    /// Whether `remote` currently has an open connection.
    fn is_connected(&self, remote: &Remote) -> bool;

    /// Queue a framed message for delivery.
    fn send_message(&self, message: OutboundMessage) -> Result<(), TransportError>;
}
