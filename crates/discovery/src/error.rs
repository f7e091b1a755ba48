//! Discovery error types.

use livecapture_core::WireError;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Reasons a port cannot be used for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortError {
    /// Port 0 asks the OS for any port, which peers could never find.
    #[error("port 0 is a reserved port and cannot be used")]
    Zero,
    /// Ports below 1024 belong to well-known services.
    #[error("port {0} is in the range [1, 1023] reserved for well-known services")]
    WellKnown(u16),
}

/// Errors raised while starting or running discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The configured port is not usable.
    #[error("invalid discovery port: {0}")]
    InvalidPort(#[from] PortError),
    /// A socket could not be created or bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the socket was bound to.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Discovery was started outside a tokio runtime.
    #[error("discovery must be started from within a tokio runtime")]
    NoRuntime,
    /// More endpoints than fit in a discovery packet.
    #[error("cannot advertise {count} end points (max {max})")]
    TooManyEndPoints {
        /// Number of endpoints requested.
        count: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// An encoded packet does not fit in one discovery datagram.
    #[error("discovery packet of {len} bytes exceeds the {max} byte datagram limit")]
    PacketTooLarge {
        /// Encoded size.
        len: usize,
        /// Largest datagram peers receive.
        max: usize,
    },
    /// A packet or server description was malformed.
    #[error(transparent)]
    Wire(#[from] WireError),
}
