//! The message envelope shared by every sender and receiver.

use crate::error::MessageError;
use crate::protocol::ProtocolLink;
use livecapture_core::{ChannelType, WireReader, WireWriter};
use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};

const HEADER_VERSION: i32 = 0;

/// Name and structural hash of a payload type carried by a generic message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataType {
    /// Name written on the wire and used to look the type up in a registry.
    pub name: String,
    /// Structural hash of the type's declared schema.
    pub hash: i32,
}

#[derive(Default)]
struct Attachment {
    code: u16,
    link: Option<Arc<ProtocolLink>>,
}

/// Id, channel and protocol assignment of a message.
pub struct MessageHeader {
    id: String,
    channel: ChannelType,
    attachment: RwLock<Attachment>,
}

impl MessageHeader {
    /// Create an unattached header.
    pub fn new(id: impl Into<String>, channel: ChannelType) -> Result<Self, MessageError> {
        let id = id.into();
        if id.is_empty() {
            return Err(MessageError::EmptyId);
        }
        Ok(Self {
            id,
            channel,
            attachment: RwLock::new(Attachment::default()),
        })
    }

    /// Identifier, unique within a protocol.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Delivery channel.
    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    /// Code assigned by the owning protocol (or read from a handshake blob).
    pub fn code(&self) -> u16 {
        self.attachment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .code
    }

    /// Whether a protocol owns this message.
    pub fn is_attached(&self) -> bool {
        self.attachment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .link
            .is_some()
    }

    /// Name of the owning protocol, if any.
    pub fn protocol_name(&self) -> Option<String> {
        self.attachment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .link
            .as_ref()
            .map(|link| link.name().to_string())
    }

    /// A fresh unattached header with the same id and channel.
    pub(crate) fn detached(&self) -> Self {
        Self {
            id: self.id.clone(),
            channel: self.channel,
            attachment: RwLock::new(Attachment::default()),
        }
    }

    /// Record the owning protocol. Later calls replace earlier ones.
    pub(crate) fn attach(&self, link: Arc<ProtocolLink>, code: u16) {
        let mut attachment = self
            .attachment
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        attachment.code = code;
        attachment.link = Some(link);
    }

    /// Frame `payload` with this message's code and pass it to the owning protocol.
    pub(crate) fn send(&self, payload: &[u8]) -> Result<(), MessageError> {
        let (code, link) = {
            let attachment = self
                .attachment
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            (attachment.code, attachment.link.clone())
        };
        let link = link.ok_or_else(|| MessageError::NotAttached(self.id.clone()))?;
        link.send(code, self.channel, payload)
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.write_i32(HEADER_VERSION);
        out.write_string(&self.id);
        out.write_u8(self.channel as u8);
        out.write_u16(self.code());
    }

    pub(crate) fn read(reader: &mut WireReader<'_>) -> Result<Self, MessageError> {
        match reader.read_i32()? {
            0 => {
                let header = Self::new(reader.read_string()?, reader.read_u8()?.try_into()?)?;
                header
                    .attachment
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .code = reader.read_u16()?;
                Ok(header)
            }
            version => Err(MessageError::UnsupportedVersion {
                section: "message header",
                version,
            }),
        }
    }
}

impl std::fmt::Debug for MessageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHeader")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("code", &self.code())
            .field("protocol", &self.protocol_name())
            .finish()
    }
}

/// Messages that decode inbound payloads.
pub trait ReceiveMessage {
    /// Decode one payload and notify every handler.
    fn receive(&self, reader: &mut WireReader<'_>) -> Result<(), MessageError>;
}

/// Messages that cache state between sends.
pub trait ResetMessage {
    /// Forget cached state so the next send always goes out.
    fn reset(&self);
}

/// Object-safe interface every protocol message implements.
pub trait Message: Send + Sync + 'static {
    /// Id, channel and protocol assignment.
    fn header(&self) -> &MessageHeader;

    /// Stable message type name written in handshakes.
    fn type_name(&self) -> &'static str;

    /// Payload type for generic messages.
    fn data_type(&self) -> Option<DataType> {
        None
    }

    /// Versioned fields appended after the header.
    fn write_payload(&self, out: &mut Vec<u8>);

    /// A new unattached message of the opposite direction with the same settings.
    fn inverse(&self) -> Arc<dyn Message>;

    /// Receive capability, used to build the dispatch table.
    fn as_receiver(&self) -> Option<&dyn ReceiveMessage> {
        None
    }

    /// Reset capability, used by [`Protocol::reset`](crate::Protocol::reset).
    fn as_sender(&self) -> Option<&dyn ResetMessage> {
        None
    }

    /// Upcast for typed lookups.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Write the header followed by the message's own fields.
    fn serialize(&self, out: &mut Vec<u8>) {
        self.header().write(out);
        self.write_payload(out);
    }

    /// Type name including the payload type, for diagnostics.
    fn display_name(&self) -> String {
        match self.data_type() {
            Some(data) => format!("{}<{}>", self.type_name(), data.name),
            None => self.type_name().to_string(),
        }
    }
}

/// Static side of a message type: its name and how to rebuild it from a handshake.
pub trait MessageType: Message + Sized {
    /// Name written in handshakes.
    const TYPE_NAME: &'static str;

    /// Payload type for generic messages.
    fn static_data_type() -> Option<DataType>;

    /// Rebuild a message from its serialized form (header included).
    fn deserialize(reader: &mut WireReader<'_>) -> Result<Self, MessageError>;

    /// Type name including the payload type, for diagnostics.
    fn static_display_name() -> String {
        match Self::static_data_type() {
            Some(data) => format!("{}<{}>", Self::TYPE_NAME, data.name),
            None => Self::TYPE_NAME.to_string(),
        }
    }
}

/// Read a section version tag and check that this build understands it.
pub(crate) fn read_section_version(
    reader: &mut WireReader<'_>,
    section: &'static str,
    supported: i32,
) -> Result<i32, MessageError> {
    let version = reader.read_i32()?;
    if version < 0 || version > supported {
        return Err(MessageError::UnsupportedVersion { section, version });
    }
    Ok(version)
}
