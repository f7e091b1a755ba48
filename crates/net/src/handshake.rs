//! Protocol definitions exchanged when a session starts.
//!
//! ```text
//! [format version: i32][name: string][major, minor, build, revision: 4 x i32]
//! [count: u16] { [length: i32][body] } * count
//!
//! body: [kind: u8 (0 = plain, 1 = generic)][message type name: string]
//!       (generic) [data type name: string][structural hash: i32]
//!       [message header and fields]
//! ```
//!
//! Every body is length-prefixed so a message this build cannot rebuild is skipped
//! and the rest of the protocol still loads.

use crate::error::{MessageError, ProtocolError};
use crate::message::Message;
use crate::protocol::Protocol;
use crate::registry::MessageRegistry;
use livecapture_core::{Version, WireError, WireReader, WireWriter};
use std::sync::Arc;
use tracing::{error, warn};

const FORMAT_VERSION: i32 = 1;

const KIND_PLAIN: u8 = 0;
const KIND_GENERIC: u8 = 1;

impl Protocol {
    /// Serialize the protocol definition.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// Append the protocol definition to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_i32(FORMAT_VERSION);
        out.write_string(self.name());
        for part in self.version().to_wire() {
            out.write_i32(part);
        }
        out.write_u16(self.len() as u16);

        let mut body = Vec::new();
        for message in self.messages() {
            body.clear();
            write_body(message.as_ref(), &mut body);
            out.write_len_prefixed(&body);
        }
    }

    /// Rebuild a protocol received from a peer.
    ///
    /// The result is read-only and keeps the peer's codes. Messages that cannot be
    /// rebuilt (unknown type, different payload shape, newer format) are logged and
    /// left out.
    pub fn deserialize(data: &[u8], registry: &MessageRegistry) -> Result<Self, ProtocolError> {
        Self::read_from(&mut WireReader::new(data), registry)
    }

    /// Read a protocol definition from `reader`.
    pub fn read_from(
        reader: &mut WireReader<'_>,
        registry: &MessageRegistry,
    ) -> Result<Self, ProtocolError> {
        let format = reader.read_i32()?;
        if !(0..=FORMAT_VERSION).contains(&format) {
            return Err(ProtocolError::UnsupportedVersion(format));
        }

        let name = reader.read_string()?;
        let version = if format > 0 {
            Version::from_wire([
                reader.read_i32()?,
                reader.read_i32()?,
                reader.read_i32()?,
                reader.read_i32()?,
            ])
        } else {
            Version::default()
        };

        let mut protocol = Protocol::with_name(name, version);
        let count = reader.read_u16()?;

        for index in 0..count {
            let length = reader.read_i32()?;
            let length = usize::try_from(length).map_err(|_| WireError::InvalidLength(length))?;
            let body = reader.read_bytes(length)?;

            let result = read_body(&mut WireReader::new(body), registry)
                .map_err(ProtocolError::from)
                .and_then(|message| {
                    let code = message.header().code();
                    protocol.insert(message, code)
                });

            if let Err(err) = result {
                match err {
                    ProtocolError::Message(MessageError::SchemaMismatch { .. }) => {
                        warn!(protocol = %protocol.name(), index, "Skipping message: {err}")
                    }
                    _ => error!(
                        protocol = %protocol.name(),
                        index,
                        "Failed to deserialize message: {err}"
                    ),
                }
            }
        }

        protocol.set_read_only();
        Ok(protocol)
    }
}

fn write_body(message: &dyn Message, out: &mut Vec<u8>) {
    match message.data_type() {
        Some(data) => {
            out.write_u8(KIND_GENERIC);
            out.write_string(message.type_name());
            out.write_string(&data.name);
            out.write_i32(data.hash);
        }
        None => {
            out.write_u8(KIND_PLAIN);
            out.write_string(message.type_name());
        }
    }
    message.serialize(out);
}

fn read_body(
    reader: &mut WireReader<'_>,
    registry: &MessageRegistry,
) -> Result<Arc<dyn Message>, MessageError> {
    let kind = reader.read_u8()?;
    let type_name = reader.read_string()?;

    match kind {
        KIND_PLAIN => registry.decode(&type_name, reader),
        KIND_GENERIC => {
            let data_type = reader.read_string()?;
            let hash = reader.read_i32()?;
            registry.decode_generic(&type_name, &data_type, hash, reader)
        }
        other => Err(WireError::InvalidEnum {
            name: "message kind",
            value: other as i64,
        }
        .into()),
    }
}
