//! Payload-less notifications.

use crate::data::HandlerList;
use crate::error::MessageError;
use crate::message::{
    read_section_version, DataType, Message, MessageHeader, MessageType, ReceiveMessage,
};
use crate::protocol::Protocol;
use crate::ProtocolError;
use livecapture_core::{ChannelType, WireReader, WireWriter};
use std::any::Any;
use std::sync::Arc;
use tracing::error;

const EVENT_VERSION: i32 = 0;

/// Callback invoked for each received event.
pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// Raises an event on the remote. Events always travel on the reliable channel.
pub struct EventSender {
    header: MessageHeader,
}

impl EventSender {
    /// Create an event sender.
    pub fn new(id: impl Into<String>) -> Result<Self, MessageError> {
        Ok(Self {
            header: MessageHeader::new(id, ChannelType::ReliableOrdered)?,
        })
    }

    /// Raise the event. Failures are logged.
    pub fn send(&self) {
        if let Err(err) = self.header.send(&[]) {
            error!(message = self.header.id(), "Failed to send event: {err}");
        }
    }

    /// Look up an event sender by id.
    pub fn get(protocol: &Protocol, id: &str) -> Result<Arc<Self>, ProtocolError> {
        protocol.get::<Self>(id)
    }

    /// Look up an event sender by id, returning `None` on any mismatch.
    pub fn try_get(protocol: &Protocol, id: &str) -> Option<Arc<Self>> {
        protocol.get::<Self>(id).ok()
    }
}

impl Message for EventSender {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        out.write_i32(EVENT_VERSION);
    }

    fn inverse(&self) -> Arc<dyn Message> {
        Arc::new(EventReceiver::from_header(self.header.detached()))
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl MessageType for EventSender {
    const TYPE_NAME: &'static str = "EventSender";

    fn static_data_type() -> Option<DataType> {
        None
    }

    fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, MessageError> {
        let header = MessageHeader::read(reader)?;
        read_section_version(reader, Self::TYPE_NAME, EVENT_VERSION)?;
        Ok(Self { header })
    }
}

/// Notifies handlers when the remote raises an event.
pub struct EventReceiver {
    header: MessageHeader,
    handlers: HandlerList<dyn Fn() + Send + Sync>,
}

impl EventReceiver {
    /// Create an event receiver.
    pub fn new(id: impl Into<String>) -> Result<Self, MessageError> {
        Ok(Self::from_header(MessageHeader::new(
            id,
            ChannelType::ReliableOrdered,
        )?))
    }

    fn from_header(header: MessageHeader) -> Self {
        Self {
            header,
            handlers: HandlerList::default(),
        }
    }

    /// Register a handler. Registering the same handler again has no effect.
    pub fn add_handler(&self, handler: EventHandler) {
        self.handlers.add(handler);
    }

    /// Unregister a handler, returning whether it was registered.
    pub fn remove_handler(&self, handler: &EventHandler) -> bool {
        self.handlers.remove(handler)
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Look up an event receiver by id.
    pub fn get(protocol: &Protocol, id: &str) -> Result<Arc<Self>, ProtocolError> {
        protocol.get::<Self>(id)
    }

    /// Look up an event receiver by id, returning `None` on any mismatch.
    pub fn try_get(protocol: &Protocol, id: &str) -> Option<Arc<Self>> {
        protocol.get::<Self>(id).ok()
    }
}

impl ReceiveMessage for EventReceiver {
    fn receive(&self, _reader: &mut WireReader<'_>) -> Result<(), MessageError> {
        self.handlers.invoke(self.header.id(), |handler| handler());
        Ok(())
    }
}

impl Message for EventReceiver {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        out.write_i32(EVENT_VERSION);
    }

    fn inverse(&self) -> Arc<dyn Message> {
        Arc::new(EventSender {
            header: self.header.detached(),
        })
    }

    fn as_receiver(&self) -> Option<&dyn ReceiveMessage> {
        Some(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl MessageType for EventReceiver {
    const TYPE_NAME: &'static str = "EventReceiver";

    fn static_data_type() -> Option<DataType> {
        None
    }

    fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, MessageError> {
        let header = MessageHeader::read(reader)?;
        read_section_version(reader, Self::TYPE_NAME, EVENT_VERSION)?;
        Ok(Self::from_header(header))
    }
}
