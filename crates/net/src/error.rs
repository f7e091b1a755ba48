//! Error types for messages and protocols.

use livecapture_core::WireError;
use thiserror::Error;

/// Failure reported by a [`Network`](crate::Network) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Errors raised while building, encoding or decoding a single message.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Message ids identify messages inside a protocol and cannot be empty.
    #[error("message id must not be empty")]
    EmptyId,
    /// Malformed or truncated bytes.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// A versioned section was written by a newer application.
    #[error("{section} version {version} is not supported by this application version")]
    UnsupportedVersion {
        /// Section that carried the version tag.
        section: &'static str,
        /// Version tag that was read.
        version: i32,
    },
    /// The message was used before being added to a protocol.
    #[error("message \"{0}\" has not been added to a protocol")]
    NotAttached(String),
    /// No factory is registered for this message type name.
    #[error("message type \"{0}\" does not exist")]
    UnknownMessageType(String),
    /// No payload type is registered under this name.
    #[error("data type \"{0}\" does not exist")]
    UnknownDataType(String),
    /// The payload type is known but not for this message type.
    #[error("message type \"{message_type}\" is not registered for data type \"{data_type}\"")]
    UnknownGenericMessage {
        /// Message type name.
        message_type: String,
        /// Payload type name.
        data_type: String,
    },
    /// The peer's payload type has a different shape than ours.
    #[error(
        "hash for data type \"{data_type}\" does not match the received hash \
         (local {local:#010x}, remote {remote:#010x}); there is likely a version mismatch"
    )]
    SchemaMismatch {
        /// Payload type name.
        data_type: String,
        /// Hash computed locally.
        local: i32,
        /// Hash sent by the peer.
        remote: i32,
    },
    /// JSON payload could not be encoded or decoded.
    #[error("json payload error: {0}")]
    Json(#[from] serde_json::Error),
    /// PNG or JPEG encoding failed.
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    /// Texture dimensions or pixel data are inconsistent.
    #[error("invalid texture: {0}")]
    InvalidTexture(String),
    /// The transport refused the outbound message.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by [`Protocol`](crate::Protocol) operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Protocols are looked up by name and cannot have an empty one.
    #[error("protocol name must not be empty")]
    EmptyName,
    /// Inverse and deserialized protocols cannot be modified.
    #[error("cannot add message \"{id}\" to protocol \"{protocol}\" because it is read-only")]
    ReadOnly {
        /// Protocol name.
        protocol: String,
        /// Rejected message id.
        id: String,
    },
    /// The message already belongs to a protocol.
    #[error("message \"{id}\" is already assigned to protocol \"{owner}\"")]
    AlreadyAssigned {
        /// Message id.
        id: String,
        /// Name of the owning protocol.
        owner: String,
    },
    /// Another message in the protocol uses this id.
    #[error("a message with id \"{id}\" already exists in protocol \"{protocol}\"")]
    DuplicateId {
        /// Protocol name.
        protocol: String,
        /// Conflicting id.
        id: String,
    },
    /// Another message in the protocol uses this code.
    #[error("code {code} is already used in protocol \"{protocol}\"")]
    DuplicateCode {
        /// Protocol name.
        protocol: String,
        /// Conflicting code.
        code: u16,
    },
    /// The code space is exhausted.
    #[error("protocol \"{protocol}\" cannot hold more than {max} messages")]
    CapacityExceeded {
        /// Protocol name.
        protocol: String,
        /// Message limit.
        max: usize,
    },
    /// Lookup by id found nothing.
    #[error("no message with id \"{id}\" exists in protocol \"{protocol}\"")]
    NotFound {
        /// Protocol name.
        protocol: String,
        /// Requested id.
        id: String,
    },
    /// Lookup by id found a message of another type.
    #[error("message \"{id}\" is a {actual}, not a {expected}")]
    TypeMismatch {
        /// Requested id.
        id: String,
        /// Type the caller asked for.
        expected: String,
        /// Type that is registered.
        actual: String,
    },
    /// The handshake blob uses a newer serialization format.
    #[error("protocol format version {0} is not supported by this application version; update the application")]
    UnsupportedVersion(i32),
    /// Malformed or truncated bytes outside any single message.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// A message-level failure surfaced through the protocol.
    #[error(transparent)]
    Message(#[from] MessageError),
}
