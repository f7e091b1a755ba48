//! Message factories keyed by the names written in handshakes.

use crate::error::MessageError;
use crate::event::{EventReceiver, EventSender};
use crate::message::{Message, MessageType};
use crate::payload::{
    BinaryReceiver, BinarySender, BoolReceiver, BoolSender, JsonReceiver, JsonSender,
    StringReceiver, StringSender,
};
use crate::schema::Schema;
use crate::texture::{TextureReceiver, TextureSender};
use bytemuck::Pod;
use livecapture_core::WireReader;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

type Factory = fn(&mut WireReader<'_>) -> Result<Arc<dyn Message>, MessageError>;

struct GenericEntry {
    hash: i32,
    factory: Factory,
}

fn decode_as<M: MessageType>(
    reader: &mut WireReader<'_>,
) -> Result<Arc<dyn Message>, MessageError> {
    Ok(Arc::new(M::deserialize(reader)?))
}

/// Known message types, used to rebuild protocols received from a peer.
///
/// Non-generic types are keyed by type name. Generic types are keyed by payload type
/// name and then by message type name, and remember the payload's structural hash.
pub struct MessageRegistry {
    plain: HashMap<&'static str, Factory>,
    generic: HashMap<String, HashMap<&'static str, GenericEntry>>,
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRegistry {
    /// Registry with every built-in non-generic message type.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry
            .register::<EventSender>()
            .register::<EventReceiver>()
            .register::<BoolSender>()
            .register::<BoolReceiver>()
            .register::<StringSender>()
            .register::<StringReceiver>()
            .register::<TextureSender>()
            .register::<TextureReceiver>();
        registry
    }

    /// Registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            plain: HashMap::new(),
            generic: HashMap::new(),
        }
    }

    /// Register a message type.
    pub fn register<M: MessageType>(&mut self) -> &mut Self {
        match M::static_data_type() {
            Some(data) => {
                self.generic.entry(data.name).or_default().insert(
                    M::TYPE_NAME,
                    GenericEntry {
                        hash: data.hash,
                        factory: decode_as::<M>,
                    },
                );
            }
            None => {
                self.plain.insert(M::TYPE_NAME, decode_as::<M>);
            }
        }
        self
    }

    /// Register the binary sender and receiver for `T`.
    pub fn register_binary<T>(&mut self) -> &mut Self
    where
        T: Pod + Schema + Send + Sync,
    {
        self.register::<BinarySender<T>>()
            .register::<BinaryReceiver<T>>()
    }

    /// Register the JSON sender and receiver for `T`.
    pub fn register_json<T>(&mut self) -> &mut Self
    where
        T: Serialize + DeserializeOwned + Schema + Send + Sync + 'static,
    {
        self.register::<JsonSender<T>>().register::<JsonReceiver<T>>()
    }

    /// Whether a non-generic message type is known.
    pub fn contains(&self, type_name: &str) -> bool {
        self.plain.contains_key(type_name)
    }

    /// Whether a payload type is known.
    pub fn contains_data_type(&self, data_type: &str) -> bool {
        self.generic.contains_key(data_type)
    }

    /// Build a non-generic message from its serialized form.
    pub(crate) fn decode(
        &self,
        type_name: &str,
        reader: &mut WireReader<'_>,
    ) -> Result<Arc<dyn Message>, MessageError> {
        let factory = self
            .plain
            .get(type_name)
            .ok_or_else(|| MessageError::UnknownMessageType(type_name.to_string()))?;
        factory(reader)
    }

    /// Build a generic message, rejecting payload types whose shape differs from ours.
    pub(crate) fn decode_generic(
        &self,
        type_name: &str,
        data_type: &str,
        remote_hash: i32,
        reader: &mut WireReader<'_>,
    ) -> Result<Arc<dyn Message>, MessageError> {
        let entries = self
            .generic
            .get(data_type)
            .ok_or_else(|| MessageError::UnknownDataType(data_type.to_string()))?;
        let entry = entries
            .get(type_name)
            .ok_or_else(|| MessageError::UnknownGenericMessage {
                message_type: type_name.to_string(),
                data_type: data_type.to_string(),
            })?;

        if entry.hash != remote_hash {
            return Err(MessageError::SchemaMismatch {
                data_type: data_type.to_string(),
                local: entry.hash,
                remote: remote_hash,
            });
        }

        (entry.factory)(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = MessageRegistry::new();
        for name in [
            "EventSender",
            "EventReceiver",
            "BoolSender",
            "BoolReceiver",
            "StringSender",
            "StringReceiver",
            "TextureSender",
            "TextureReceiver",
        ] {
            assert!(registry.contains(name), "{name} missing");
        }
        assert!(!registry.contains("BinarySender"));
    }

    #[test]
    fn test_unknown_type() {
        let registry = MessageRegistry::empty();
        let err = registry
            .decode("BoolSender", &mut WireReader::new(&[]))
            .err()
            .expect("unregistered type must fail");
        assert!(matches!(err, MessageError::UnknownMessageType(name) if name == "BoolSender"));
    }
}
