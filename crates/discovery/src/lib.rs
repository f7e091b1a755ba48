#![warn(missing_docs)]
//! Finding live capture servers on the local network.
//!
//! A [`DiscoveryServer`] broadcasts who it is and where to connect over UDP; a
//! [`DiscoveryClient`] listens, tracks which servers are alive and reports
//! [`DiscoveryEvent`]s. Both need a tokio runtime and a regular call to their
//! `update` method.

mod client;
mod engine;
mod error;
mod info;
pub mod net_util;
mod packet;
mod server;
mod server_data;

pub use client::{DiscoveryClient, DiscoveryEvent};
pub use error::{DiscoveryError, PortError};
pub use info::DiscoveryInfo;
pub use packet::{Packet, PacketType, HEADER_SIZE};
pub use server::DiscoveryServer;
pub use server_data::ServerData;

use std::time::Duration;

/// Default UDP port for discovery traffic.
pub const DEFAULT_PORT: u16 = 12043;

/// Largest discovery datagram.
pub const BUFFER_SIZE: usize = 1024;

/// Most endpoints a server can announce; the count is sent as one byte.
pub const MAX_END_POINTS: usize = u8::MAX as usize;

/// How often a server announces itself.
pub const SEND_PERIOD: Duration = Duration::from_secs(5);

/// How long a client waits for an announcement before reporting a server lost.
pub const SERVER_LOSS_TIME: Duration = Duration::from_secs(16);

/// Discovery tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// UDP port shared by servers and clients.
    pub port: u16,
    /// Interval between server announcements.
    pub send_period: Duration,
    /// Silence after which a client drops a server.
    pub loss_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            send_period: SEND_PERIOD,
            loss_timeout: SERVER_LOSS_TIME,
        }
    }
}
