//! Delivery channels understood by the transport.

use crate::wire::WireError;
use serde::{Deserialize, Serialize};

/// How the transport should deliver a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelType {
    /// Guaranteed delivery, in the order messages were sent.
    #[default]
    ReliableOrdered = 0,
    /// Best effort delivery; messages may be dropped or reordered.
    UnreliableUnordered = 1,
}

impl ChannelType {
    /// Check if this channel guarantees delivery.
    pub fn is_reliable(&self) -> bool {
        matches!(self, ChannelType::ReliableOrdered)
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChannelType::ReliableOrdered),
            1 => Ok(ChannelType::UnreliableUnordered),
            _ => Err(WireError::InvalidEnum {
                name: "ChannelType",
                value: value as i64,
            }),
        }
    }
}
