//! Typed senders and receivers built on [`MessageHeader`].
//!
//! A [`DataSender`] formats values with a [`PayloadCodec`] and hands the bytes to its
//! protocol. A [`DataReceiver`] decodes them with the same codec and fans the value out
//! to its handlers. The concrete message families are type aliases over these two.

use crate::error::MessageError;
use crate::message::{
    read_section_version, DataType, Message, MessageHeader, MessageType, ReceiveMessage,
    ResetMessage,
};
use crate::protocol::Protocol;
use crate::ProtocolError;
use bitflags::bitflags;
use livecapture_core::{ChannelType, WireReader, WireWriter};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, trace};

const DATA_VERSION: i32 = 0;

bitflags! {
    /// Behaviour switches for data messages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataOptions: i32 {
        /// Skip sends whose encoded bytes match the previous send.
        const ONLY_SEND_CHANGED_VALUES = 1;
    }
}

impl DataOptions {
    /// Options used when none are given.
    pub const DEFAULT: Self = Self::ONLY_SEND_CHANGED_VALUES;
}

impl Default for DataOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Encoding strategy for one payload type.
///
/// Codecs may carry settings (texture compression, for example); those are written into
/// the handshake after the data options, behind their own version tag.
pub trait PayloadCodec: Clone + Default + Send + Sync + 'static {
    /// Value sent and received.
    type Value: Send + Sync + 'static;

    /// Handshake name of the sender type.
    const SENDER_NAME: &'static str;
    /// Handshake name of the receiver type.
    const RECEIVER_NAME: &'static str;
    /// Options used by the plain constructors.
    const DEFAULT_OPTIONS: DataOptions = DataOptions::DEFAULT;

    /// Payload type for generic codecs.
    fn data_type() -> Option<DataType> {
        None
    }

    /// Append the encoded value.
    fn encode(&self, value: &Self::Value, out: &mut Vec<u8>) -> Result<(), MessageError>;

    /// Decode one value.
    fn decode(&self, reader: &mut WireReader<'_>) -> Result<Self::Value, MessageError>;

    /// Write the codec's versioned settings.
    fn write_settings(&self, out: &mut Vec<u8>) {
        out.write_i32(0);
    }

    /// Read settings written by [`PayloadCodec::write_settings`].
    fn read_settings(reader: &mut WireReader<'_>) -> Result<Self, MessageError> {
        read_section_version(reader, Self::SENDER_NAME, 0)?;
        Ok(Self::default())
    }
}

/// Registered callbacks of a receiver.
///
/// Handlers are compared by identity, so adding the same `Arc` twice registers it once.
pub(crate) struct HandlerList<H: ?Sized> {
    handlers: Mutex<Vec<Arc<H>>>,
}

impl<H: ?Sized> Default for HandlerList<H> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<H: ?Sized> HandlerList<H> {
    pub(crate) fn add(&self, handler: Arc<H>) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if !handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            handlers.push(handler);
        }
    }

    pub(crate) fn remove(&self, handler: &Arc<H>) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        match handlers.iter().position(|h| Arc::ptr_eq(h, handler)) {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Call every handler; a panicking handler is logged and the rest still run.
    pub(crate) fn invoke(&self, message_id: &str, call: impl Fn(&H)) {
        // Snapshot so handlers can add or remove handlers while running.
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for handler in handlers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| call(handler.as_ref())));
            if let Err(panic) = result {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(message = message_id, "Message handler failed: {reason}");
            }
        }
    }
}

/// Two scratch buffers: the last bytes sent and the bytes being formatted.
#[derive(Default)]
struct SendBuffers {
    current: Vec<u8>,
    last: Vec<u8>,
    has_last: bool,
}

/// Originates values of one payload type.
pub struct DataSender<C: PayloadCodec> {
    header: MessageHeader,
    options: DataOptions,
    codec: C,
    buffers: Mutex<SendBuffers>,
}

impl<C: PayloadCodec> DataSender<C> {
    /// Create a sender on the reliable channel with the codec's default options.
    pub fn new(id: impl Into<String>) -> Result<Self, MessageError> {
        Self::with_options(id, ChannelType::ReliableOrdered, C::DEFAULT_OPTIONS)
    }

    /// Create a sender with an explicit channel and options.
    pub fn with_options(
        id: impl Into<String>,
        channel: ChannelType,
        options: DataOptions,
    ) -> Result<Self, MessageError> {
        Self::with_codec(id, channel, options, C::default())
    }

    /// Create a sender with explicit codec settings.
    pub fn with_codec(
        id: impl Into<String>,
        channel: ChannelType,
        options: DataOptions,
        codec: C,
    ) -> Result<Self, MessageError> {
        Ok(Self::from_parts(MessageHeader::new(id, channel)?, options, codec))
    }

    fn from_parts(header: MessageHeader, options: DataOptions, codec: C) -> Self {
        Self {
            header,
            options,
            codec,
            buffers: Mutex::new(SendBuffers::default()),
        }
    }

    /// Options this sender was built with.
    pub fn options(&self) -> DataOptions {
        self.options
    }

    /// Codec settings.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Send a value to the remote.
    ///
    /// Failures are logged and reset the change-suppression cache instead of being
    /// returned; the next call starts fresh.
    pub fn send(&self, value: &C::Value) {
        if let Err(err) = self.try_send(value) {
            error!(message = self.header.id(), "Failed to send message: {err}");
            self.reset();
        }
    }

    fn try_send(&self, value: &C::Value) -> Result<(), MessageError> {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        let SendBuffers {
            current,
            last,
            has_last,
        } = &mut *buffers;

        current.clear();
        self.codec.encode(value, current)?;

        let suppress = self.options.contains(DataOptions::ONLY_SEND_CHANGED_VALUES);
        // Slice equality checks the lengths before comparing bytes.
        if suppress && *has_last && current.as_slice() == last.as_slice() {
            trace!(message = self.header.id(), "Skipping unchanged value");
            return Ok(());
        }

        if suppress {
            std::mem::swap(current, last);
            *has_last = true;
            self.header.send(last)
        } else {
            self.header.send(current)
        }
    }

    /// Look up a sender of this type by id.
    pub fn get(protocol: &Protocol, id: &str) -> Result<Arc<Self>, ProtocolError> {
        protocol.get::<Self>(id)
    }

    /// Look up a sender of this type by id, returning `None` on any mismatch.
    pub fn try_get(protocol: &Protocol, id: &str) -> Option<Arc<Self>> {
        protocol.get::<Self>(id).ok()
    }
}

impl<C: PayloadCodec> ResetMessage for DataSender<C> {
    fn reset(&self) {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .has_last = false;
    }
}

impl<C: PayloadCodec> Message for DataSender<C> {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        C::SENDER_NAME
    }

    fn data_type(&self) -> Option<DataType> {
        C::data_type()
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        write_options(out, self.options);
        self.codec.write_settings(out);
    }

    fn inverse(&self) -> Arc<dyn Message> {
        Arc::new(DataReceiver::from_parts(
            self.header.detached(),
            self.options,
            self.codec.clone(),
        ))
    }

    fn as_sender(&self) -> Option<&dyn ResetMessage> {
        Some(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<C: PayloadCodec> MessageType for DataSender<C> {
    const TYPE_NAME: &'static str = C::SENDER_NAME;

    fn static_data_type() -> Option<DataType> {
        C::data_type()
    }

    fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, MessageError> {
        let header = MessageHeader::read(reader)?;
        let options = read_options(reader)?;
        let codec = C::read_settings(reader)?;
        Ok(Self::from_parts(header, options, codec))
    }
}

/// Callback invoked with each received value.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Consumes values of one payload type.
pub struct DataReceiver<C: PayloadCodec> {
    header: MessageHeader,
    options: DataOptions,
    codec: C,
    handlers: HandlerList<dyn Fn(&C::Value) + Send + Sync>,
}

impl<C: PayloadCodec> DataReceiver<C> {
    /// Create a receiver on the reliable channel with the codec's default options.
    pub fn new(id: impl Into<String>) -> Result<Self, MessageError> {
        Self::with_options(id, ChannelType::ReliableOrdered, C::DEFAULT_OPTIONS)
    }

    /// Create a receiver with an explicit channel and options.
    pub fn with_options(
        id: impl Into<String>,
        channel: ChannelType,
        options: DataOptions,
    ) -> Result<Self, MessageError> {
        Self::with_codec(id, channel, options, C::default())
    }

    /// Create a receiver with explicit codec settings.
    pub fn with_codec(
        id: impl Into<String>,
        channel: ChannelType,
        options: DataOptions,
        codec: C,
    ) -> Result<Self, MessageError> {
        Ok(Self::from_parts(MessageHeader::new(id, channel)?, options, codec))
    }

    fn from_parts(header: MessageHeader, options: DataOptions, codec: C) -> Self {
        Self {
            header,
            options,
            codec,
            handlers: HandlerList::default(),
        }
    }

    /// Options this receiver was built with.
    pub fn options(&self) -> DataOptions {
        self.options
    }

    /// Codec settings.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Register a handler. Registering the same handler again has no effect.
    pub fn add_handler(&self, handler: Handler<C::Value>) {
        self.handlers.add(handler);
    }

    /// Unregister a handler, returning whether it was registered.
    pub fn remove_handler(&self, handler: &Handler<C::Value>) -> bool {
        self.handlers.remove(handler)
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Look up a receiver of this type by id.
    pub fn get(protocol: &Protocol, id: &str) -> Result<Arc<Self>, ProtocolError> {
        protocol.get::<Self>(id)
    }

    /// Look up a receiver of this type by id, returning `None` on any mismatch.
    pub fn try_get(protocol: &Protocol, id: &str) -> Option<Arc<Self>> {
        protocol.get::<Self>(id).ok()
    }
}

impl<C: PayloadCodec> ReceiveMessage for DataReceiver<C> {
    fn receive(&self, reader: &mut WireReader<'_>) -> Result<(), MessageError> {
        let value = self.codec.decode(reader)?;
        self.handlers
            .invoke(self.header.id(), |handler| handler(&value));
        Ok(())
    }
}

impl<C: PayloadCodec> Message for DataReceiver<C> {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        C::RECEIVER_NAME
    }

    fn data_type(&self) -> Option<DataType> {
        C::data_type()
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        write_options(out, self.options);
        self.codec.write_settings(out);
    }

    fn inverse(&self) -> Arc<dyn Message> {
        Arc::new(DataSender::from_parts(
            self.header.detached(),
            self.options,
            self.codec.clone(),
        ))
    }

    fn as_receiver(&self) -> Option<&dyn ReceiveMessage> {
        Some(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<C: PayloadCodec> MessageType for DataReceiver<C> {
    const TYPE_NAME: &'static str = C::RECEIVER_NAME;

    fn static_data_type() -> Option<DataType> {
        C::data_type()
    }

    fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, MessageError> {
        let header = MessageHeader::read(reader)?;
        let options = read_options(reader)?;
        let codec = C::read_settings(reader)?;
        Ok(Self::from_parts(header, options, codec))
    }
}

fn write_options(out: &mut Vec<u8>, options: DataOptions) {
    out.write_i32(DATA_VERSION);
    out.write_i32(options.bits());
}

fn read_options(reader: &mut WireReader<'_>) -> Result<DataOptions, MessageError> {
    read_section_version(reader, "data options", DATA_VERSION)?;
    Ok(DataOptions::from_bits_truncate(reader.read_i32()?))
}
