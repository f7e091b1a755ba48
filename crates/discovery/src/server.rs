//! Announces a server on the local network.

use crate::engine::{Broadcaster, DiscoveryEngine, PacketSink, SendAddresses, SendMode};
use crate::error::DiscoveryError;
use crate::info::DiscoveryInfo;
use crate::packet::Packet;
use crate::server_data::ServerData;
use crate::{DiscoveryOptions, MAX_END_POINTS};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone)]
struct Announcer {
    packet: Arc<[u8]>,
    broadcaster: Broadcaster,
    last_send: Arc<Mutex<Option<Instant>>>,
}

impl Announcer {
    fn announce(&self) {
        self.broadcaster.broadcast(&self.packet, SendMode::Async);
        *self.last_send.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}

struct ServerSink {
    product_name: String,
    announcer: Announcer,
}

impl PacketSink for ServerSink {
    fn on_packet(&self, packet: Packet, from: SocketAddr) {
        if let Packet::Request { product_name } = packet {
            if product_name == self.product_name {
                debug!(%from, "Answering discovery request");
                self.announcer.announce();
            }
        }
    }
}

/// Periodically broadcasts a server's identity and endpoints.
///
/// Announcements go out on start, every send period from [`update`](Self::update), and
/// whenever a client of the same product asks. Stopping broadcasts a shutdown notice so
/// clients drop the server right away.
pub struct DiscoveryServer {
    engine: DiscoveryEngine,
    send_period: Duration,
    server_data: Option<ServerData>,
    end_points: Vec<SocketAddrV4>,
    announcer: Option<Announcer>,
    last_send: Arc<Mutex<Option<Instant>>>,
}

impl Default for DiscoveryServer {
    fn default() -> Self {
        Self::new(DiscoveryOptions::default())
    }
}

impl DiscoveryServer {
    /// Create a stopped server.
    pub fn new(options: DiscoveryOptions) -> Self {
        Self {
            engine: DiscoveryEngine::new("DiscoveryServer", options.port),
            send_period: options.send_period,
            server_data: None,
            end_points: Vec::new(),
            announcer: None,
            last_send: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether the server is announcing.
    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Discovery port.
    pub fn port(&self) -> u16 {
        self.engine.port()
    }

    /// Change the discovery port; takes effect on the next start.
    pub fn set_port(&mut self, port: u16) {
        self.engine.set_port(port);
    }

    /// Identity being announced, if started.
    pub fn server_data(&self) -> Option<&ServerData> {
        self.server_data.as_ref()
    }

    /// Endpoints being announced: deduplicated, without loopback addresses.
    pub fn end_points(&self) -> &[SocketAddrV4] {
        &self.end_points
    }

    /// When the last announcement was sent.
    pub fn last_broadcast(&self) -> Option<Instant> {
        *self.last_send.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start announcing `server_data` with the endpoints clients may connect to.
    ///
    /// Broadcasts go out only on interfaces that own one of the endpoints. A running
    /// server is stopped first.
    pub fn start(
        &mut self,
        server_data: ServerData,
        end_points: &[SocketAddrV4],
    ) -> Result<(), DiscoveryError> {
        if end_points.len() > MAX_END_POINTS {
            return Err(DiscoveryError::TooManyEndPoints {
                count: end_points.len(),
                max: MAX_END_POINTS,
            });
        }

        let mut unique: Vec<SocketAddrV4> = Vec::with_capacity(end_points.len());
        for end_point in end_points {
            // Loopback means nothing to a remote peer.
            if !end_point.ip().is_loopback() && !unique.contains(end_point) {
                unique.push(*end_point);
            }
        }

        let packet: Arc<[u8]> =
            Packet::Discovery(DiscoveryInfo::new(server_data.clone(), unique.clone()))
                .encode_datagram()?
                .into();
        self.stop();

        let send_addresses = SendAddresses::Only(unique.iter().map(|e| *e.ip()).collect());

        *self.last_send.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let last_send = self.last_send.clone();
        let product_name = server_data.product_name().to_string();
        let mut announcer = None;

        self.engine.start(send_addresses, |broadcaster| {
            let created = Announcer {
                packet,
                broadcaster,
                last_send,
            };
            announcer = Some(created.clone());
            Arc::new(ServerSink {
                product_name,
                announcer: created,
            })
        })?;

        info!(server = %server_data, end_points = unique.len(), "Advertising server");
        self.server_data = Some(server_data);
        self.end_points = unique;
        self.announcer = announcer;
        if let Some(announcer) = &self.announcer {
            if announcer.broadcaster.socket_count() == 0 {
                warn!(
                    end_points = self.end_points.len(),
                    "No local interface owns an advertised endpoint; nothing will be broadcast"
                );
            }
            announcer.announce();
        }
        Ok(())
    }

    /// Send the shutdown notice and stop announcing. Safe to call when stopped.
    pub fn stop(&mut self) {
        if !self.engine.is_running() {
            return;
        }

        if let Some(data) = &self.server_data {
            let packet: Arc<[u8]> = Packet::Shutdown { id: data.id() }.encode().into();
            self.engine.broadcast(&packet, SendMode::Immediate);
            info!(server = %data, "Stopped advertising server");
        }
        self.engine.stop();
        self.announcer = None;
    }

    /// Rebroadcast once a send period has passed since the last announcement.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// [`update`](Self::update) with an explicit current time.
    pub fn update_at(&mut self, now: Instant) {
        if !self.engine.is_running() {
            return;
        }
        self.engine.maintain();

        let due = match self.last_broadcast() {
            Some(last) => now.saturating_duration_since(last) > self.send_period,
            None => true,
        };
        if due {
            if let Some(announcer) = &self.announcer {
                announcer.announce();
            }
        }
    }
}

impl Drop for DiscoveryServer {
    fn drop(&mut self) {
        self.stop();
    }
}
