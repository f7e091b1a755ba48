#![warn(missing_docs)]
//! Message protocols for live capture sessions.
//!
//! A [`Protocol`] is a named, versioned list of typed messages. Application code builds
//! one from senders and receivers, sends its serialized definition to the peer during
//! the handshake, and the peer answers with the inverse so both sides agree on message
//! codes. After that, [`Protocol::receive_message`] routes inbound bytes to receivers and
//! senders push values through the bound [`Network`].

mod data;
mod error;
mod event;
mod handshake;
mod message;
mod payload;
mod protocol;
mod registry;
pub mod schema;
mod texture;
mod transport;

pub use data::{DataOptions, DataReceiver, DataSender, Handler, PayloadCodec};
pub use error::{MessageError, ProtocolError, TransportError};
pub use event::{EventHandler, EventReceiver, EventSender};
pub use message::{DataType, Message, MessageHeader, MessageType, ReceiveMessage, ResetMessage};
pub use payload::{
    BinaryCodec, BinaryReceiver, BinarySender, BoolCodec, BoolReceiver, BoolSender, JsonCodec,
    JsonReceiver, JsonSender, StringCodec, StringReceiver, StringSender,
};
pub use protocol::{Protocol, MAX_MESSAGES};
pub use registry::MessageRegistry;
pub use schema::{Schema, TypeSchema};
pub use texture::{
    FilterMode, Texture, TextureCodec, TextureCompression, TextureData, TextureFormat,
    TextureReceiver, TextureSender, WrapMode,
};
pub use transport::{InboundMessage, Network, OutboundMessage, Remote};

pub use livecapture_core::{ChannelType, Version};
