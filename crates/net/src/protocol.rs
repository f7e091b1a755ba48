//! Named, versioned collections of messages.
//!
//! A protocol assigns each message a dense `u16` code in the order messages are added.
//! The peer builds its side with [`Protocol::create_inverse`], so codes line up and only
//! the code travels with each message.

use crate::error::{MessageError, ProtocolError};
use crate::message::{Message, MessageType};
use crate::transport::{InboundMessage, Network, OutboundMessage, Remote};
use livecapture_core::{ChannelType, Version, WireReader, WireWriter};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace};

/// Maximum number of messages a protocol can hold.
pub const MAX_MESSAGES: usize = u16::MAX as usize - 1;

#[derive(Clone)]
struct NetworkBinding {
    network: Arc<dyn Network>,
    remote: Remote,
}

/// State shared between a protocol and its messages so senders can reach the network.
pub(crate) struct ProtocolLink {
    name: String,
    binding: RwLock<Option<NetworkBinding>>,
}

impl ProtocolLink {
    fn new(name: String) -> Self {
        Self {
            name,
            binding: RwLock::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn send(
        &self,
        code: u16,
        channel: ChannelType,
        payload: &[u8],
    ) -> Result<(), MessageError> {
        // Clone the binding out so the transport never runs under our lock.
        let binding = self
            .binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(NetworkBinding { network, remote }) = binding else {
            return Ok(());
        };
        if !network.is_connected(&remote) {
            return Ok(());
        }

        let mut data = Vec::with_capacity(2 + payload.len());
        data.write_u16(code);
        data.write_bytes(payload);

        trace!(protocol = %self.name, code, len = data.len(), "Sending message");
        network.send_message(OutboundMessage {
            remote,
            channel,
            data,
        })?;
        Ok(())
    }
}

/// A named, versioned set of messages.
pub struct Protocol {
    name: String,
    version: Version,
    read_only: bool,
    link: Arc<ProtocolLink>,
    messages: Vec<Arc<dyn Message>>,
    ids: HashMap<String, usize>,
    codes: HashSet<u16>,
    receivers: HashMap<u16, Arc<dyn Message>>,
}

impl Protocol {
    /// Create an empty, writable protocol.
    pub fn new(name: impl Into<String>, version: Version) -> Result<Self, ProtocolError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ProtocolError::EmptyName);
        }
        Ok(Self::with_name(name, version))
    }

    pub(crate) fn with_name(name: String, version: Version) -> Self {
        Self {
            link: Arc::new(ProtocolLink::new(name.clone())),
            name,
            version,
            read_only: false,
            messages: Vec::new(),
            ids: HashMap::new(),
            codes: HashSet::new(),
            receivers: HashMap::new(),
        }
    }

    /// Protocol name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Whether messages can still be added.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn set_read_only(&mut self) {
        self.read_only = true;
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the protocol has no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages in code order.
    pub fn messages(&self) -> impl Iterator<Item = &Arc<dyn Message>> {
        self.messages.iter()
    }

    /// Add a message and assign it the next code.
    pub fn add<M: Message>(&mut self, message: Arc<M>) -> Result<Arc<M>, ProtocolError> {
        if self.read_only {
            return Err(ProtocolError::ReadOnly {
                protocol: self.name.clone(),
                id: message.header().id().to_string(),
            });
        }
        let code = self.messages.len() as u16;
        self.insert(message.clone(), code)?;
        Ok(message)
    }

    /// Add a message with a known code, bypassing the read-only check.
    pub(crate) fn insert(
        &mut self,
        message: Arc<dyn Message>,
        code: u16,
    ) -> Result<(), ProtocolError> {
        let header = message.header();
        let id = header.id();

        if let Some(owner) = header.protocol_name() {
            return Err(ProtocolError::AlreadyAssigned {
                id: id.to_string(),
                owner,
            });
        }
        if self.ids.contains_key(id) {
            return Err(ProtocolError::DuplicateId {
                protocol: self.name.clone(),
                id: id.to_string(),
            });
        }
        if self.messages.len() >= MAX_MESSAGES {
            return Err(ProtocolError::CapacityExceeded {
                protocol: self.name.clone(),
                max: MAX_MESSAGES,
            });
        }
        if self.codes.contains(&code) {
            return Err(ProtocolError::DuplicateCode {
                protocol: self.name.clone(),
                code,
            });
        }

        header.attach(self.link.clone(), code);
        debug!(protocol = %self.name, id, code, kind = %message.display_name(), "Added message");

        self.ids.insert(id.to_string(), self.messages.len());
        self.codes.insert(code);
        if message.as_receiver().is_some() {
            self.receivers.insert(code, message.clone());
        }
        self.messages.push(message);
        Ok(())
    }

    /// Look up a message by id and type.
    pub fn get<M: MessageType>(&self, id: &str) -> Result<Arc<M>, ProtocolError> {
        let message = self
            .ids
            .get(id)
            .map(|&index| self.messages[index].clone())
            .ok_or_else(|| ProtocolError::NotFound {
                protocol: self.name.clone(),
                id: id.to_string(),
            })?;

        let actual = message.display_name();
        message
            .into_any()
            .downcast::<M>()
            .map_err(|_| ProtocolError::TypeMismatch {
                id: id.to_string(),
                expected: M::static_display_name(),
                actual,
            })
    }

    /// Look up a message by id without checking its type.
    pub fn find(&self, id: &str) -> Option<&Arc<dyn Message>> {
        self.ids.get(id).map(|&index| &self.messages[index])
    }

    /// Look up an event sender by id.
    pub fn event_sender(&self, id: &str) -> Result<Arc<crate::EventSender>, ProtocolError> {
        self.get(id)
    }

    /// Look up an event receiver by id.
    pub fn event_receiver(&self, id: &str) -> Result<Arc<crate::EventReceiver>, ProtocolError> {
        self.get(id)
    }

    /// Look up a data sender by id.
    pub fn data_sender<C: crate::PayloadCodec>(
        &self,
        id: &str,
    ) -> Result<Arc<crate::DataSender<C>>, ProtocolError> {
        self.get(id)
    }

    /// Look up a data receiver by id.
    pub fn data_receiver<C: crate::PayloadCodec>(
        &self,
        id: &str,
    ) -> Result<Arc<crate::DataReceiver<C>>, ProtocolError> {
        self.get(id)
    }

    /// Build the protocol the remote side must use: same name, version and codes, with
    /// every message replaced by its inverse. The result is read-only.
    pub fn create_inverse(&self) -> Result<Protocol, ProtocolError> {
        let mut inverse = Protocol::with_name(self.name.clone(), self.version);
        for message in &self.messages {
            inverse.insert(message.inverse(), message.header().code())?;
        }
        inverse.set_read_only();
        Ok(inverse)
    }

    /// Clear the cached state of every sender so the next sends all go out.
    pub fn reset(&self) {
        for message in &self.messages {
            if let Some(sender) = message.as_sender() {
                sender.reset();
            }
        }
    }

    /// Route this protocol's messages to `remote` over `network`.
    pub fn set_network(&self, network: Arc<dyn Network>, remote: Remote) {
        *self
            .link
            .binding
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(NetworkBinding { network, remote });
    }

    /// Stop routing messages anywhere; sends become no-ops.
    pub fn clear_network(&self) {
        *self
            .link
            .binding
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Frame `[code][payload]` and hand it to the transport, if connected.
    pub fn send_message(
        &self,
        code: u16,
        channel: ChannelType,
        payload: &[u8],
    ) -> Result<(), MessageError> {
        self.link.send(code, channel, payload)
    }

    /// Dispatch an inbound message to the receiver registered for its code.
    ///
    /// Unknown codes are dropped so peers with newer protocols can still talk to us.
    pub fn receive_message(&self, message: InboundMessage) -> Result<(), ProtocolError> {
        let mut reader = WireReader::new(&message.data);
        let code = reader.read_u16()?;

        let Some(receiver) = self.receivers.get(&code) else {
            trace!(protocol = %self.name, code, "Dropping message with unknown code");
            return Ok(());
        };
        if let Some(receiver) = receiver.as_receiver() {
            receiver.receive(&mut reader)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("read_only", &self.read_only)
            .field("messages", &self.messages.len())
            .finish()
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} {}", self.name, self.version)?;
        for message in &self.messages {
            let header = message.header();
            writeln!(
                f,
                "  [{}] {} ({}, {:?})",
                header.code(),
                header.id(),
                message.display_name(),
                header.channel()
            )?;
        }
        Ok(())
    }
}
