//! Finds servers of one product and tracks whether they are still alive.

use crate::engine::{DiscoveryEngine, PacketSink, SendAddresses, SendMode};
use crate::error::DiscoveryError;
use crate::info::DiscoveryInfo;
use crate::net_util::local_ipv4_addresses;
use crate::packet::Packet;
use crate::DiscoveryOptions;
use livecapture_core::wire::check_string_length;
use livecapture_core::STRING_MAX_LENGTH;
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, trace};
use uuid::Uuid;

/// Server availability changes reported by [`DiscoveryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A server was seen for the first time, or with a new configuration.
    ServerFound(DiscoveryInfo),
    /// A server shut down, timed out, or changed configuration. Carries the last
    /// configuration seen.
    ServerLost(DiscoveryInfo),
}

struct TrackedServer {
    info: DiscoveryInfo,
    last_update: Instant,
}

/// Filters announcements on the receive task and queues them for the next update.
struct ClientSink {
    product_name: String,
    ignored: Option<HashSet<Ipv4Addr>>,
    updated: mpsc::UnboundedSender<DiscoveryInfo>,
    lost: mpsc::UnboundedSender<Uuid>,
}

impl PacketSink for ClientSink {
    fn on_packet(&self, packet: Packet, from: SocketAddr) {
        match packet {
            Packet::Shutdown { id } => {
                let _ = self.lost.send(id);
            }
            Packet::Discovery(info) => {
                if info.server_info.product_name() != self.product_name {
                    return;
                }
                if let Some(ignored) = &self.ignored {
                    if info.end_points.iter().any(|end_point| ignored.contains(end_point.ip())) {
                        trace!(%from, "Ignoring announcement from this host");
                        return;
                    }
                }
                let _ = self.updated.send(info);
            }
            Packet::Request { .. } => {}
        }
    }
}

/// Listens for server announcements.
///
/// Packets are queued by the receive task; [`update`](Self::update) applies them and
/// emits [`DiscoveryEvent`]s to subscribers. Call it regularly.
pub struct DiscoveryClient {
    engine: DiscoveryEngine,
    loss_timeout: Duration,
    product_name: String,
    request: Arc<[u8]>,
    updated: mpsc::UnboundedReceiver<DiscoveryInfo>,
    lost: mpsc::UnboundedReceiver<Uuid>,
    servers: HashMap<Uuid, TrackedServer>,
    subscribers: Vec<mpsc::UnboundedSender<DiscoveryEvent>>,
}

impl Default for DiscoveryClient {
    fn default() -> Self {
        Self::new(DiscoveryOptions::default())
    }
}

impl DiscoveryClient {
    /// Create a stopped client.
    pub fn new(options: DiscoveryOptions) -> Self {
        Self {
            engine: DiscoveryEngine::new("DiscoveryClient", options.port),
            loss_timeout: options.loss_timeout,
            product_name: String::new(),
            request: Arc::from(Vec::new()),
            updated: mpsc::unbounded_channel().1,
            lost: mpsc::unbounded_channel().1,
            servers: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Subscribe to found/lost events.
    ///
    /// Every subscriber receives every event raised after it subscribed, in order.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DiscoveryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Whether the client is listening.
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

    /// Product filter in use.
    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    /// Servers currently considered alive.
    pub fn servers(&self) -> Vec<DiscoveryInfo> {
        self.servers.values().map(|server| server.info.clone()).collect()
    }

    /// Start looking for servers of `product_name`.
    ///
    /// With `discover_local` false, servers advertising an address of this host are
    /// ignored. Restarting forgets every tracked server without reporting it lost.
    pub fn start(
        &mut self,
        product_name: &str,
        discover_local: bool,
    ) -> Result<(), DiscoveryError> {
        check_string_length(product_name, STRING_MAX_LENGTH)?;

        let sink = self.prepare(product_name, discover_local);
        self.engine.start(SendAddresses::AllLocal, move |_| Arc::new(sink))?;

        info!(product = product_name, port = self.port(), "Looking for servers");
        self.refresh();
        Ok(())
    }

    /// Ask servers to announce themselves now instead of at their next period.
    pub fn refresh(&self) {
        self.engine.broadcast(&self.request, SendMode::Async);
    }

    /// Stop listening. Every tracked server is reported lost.
    pub fn stop(&mut self) {
        let ids: Vec<Uuid> = self.servers.keys().copied().collect();
        for id in ids {
            self.lose(id);
        }
        self.engine.stop();
    }

    /// Apply queued packets and expire silent servers.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// [`update`](Self::update) with an explicit current time.
    pub fn update_at(&mut self, now: Instant) {
        if !self.engine.is_running() {
            return;
        }
        self.engine.maintain();
        self.process(now);
    }

    fn prepare(&mut self, product_name: &str, discover_local: bool) -> ClientSink {
        let (updated_tx, updated_rx) = mpsc::unbounded_channel();
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        self.updated = updated_rx;
        self.lost = lost_rx;
        self.servers.clear();

        self.product_name = product_name.to_string();
        self.request = Packet::Request {
            product_name: self.product_name.clone(),
        }
        .encode()
        .into();

        ClientSink {
            product_name: self.product_name.clone(),
            ignored: (!discover_local).then(|| local_ipv4_addresses(true).into_iter().collect()),
            updated: updated_tx,
            lost: lost_tx,
        }
    }

    fn process(&mut self, now: Instant) {
        while let Ok(info) = self.updated.try_recv() {
            let id = info.server_info.id();

            // A changed configuration is reported as the old one going away.
            if self.servers.get(&id).is_some_and(|server| server.info != info) {
                self.lose(id);
            }
            if !self.servers.contains_key(&id) {
                info!(server = %info, "Found server");
                self.emit(DiscoveryEvent::ServerFound(info.clone()));
            }
            self.servers.insert(
                id,
                TrackedServer {
                    info,
                    last_update: now,
                },
            );
        }

        let stale: Vec<Uuid> = self
            .servers
            .iter()
            .filter(|(_, server)| {
                now.saturating_duration_since(server.last_update) > self.loss_timeout
            })
            .map(|(id, _)| *id)
            .collect();
        let mut lost: Vec<Uuid> = std::iter::from_fn(|| self.lost.try_recv().ok()).collect();
        lost.extend(stale);

        for id in lost {
            self.lose(id);
        }
    }

    fn lose(&mut self, id: Uuid) {
        if let Some(server) = self.servers.remove(&id) {
            info!(server = %server.info, "Lost server");
            self.emit(DiscoveryEvent::ServerLost(server.info));
        }
    }

    fn emit(&mut self, event: DiscoveryEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_data::ServerData;
    use livecapture_core::Version;
    use std::net::SocketAddrV4;
    use tokio::sync::mpsc::error::TryRecvError;

    const SERVER: Uuid = Uuid::from_u128(0x5e5e);

    fn announcement(product: &str, instance: &str, address: Ipv4Addr) -> Packet {
        let data = ServerData::new(product, instance, SERVER, Version::new(1, 0)).unwrap();
        Packet::Discovery(DiscoveryInfo::new(
            data,
            vec![SocketAddrV4::new(address, 9000)],
        ))
    }

    fn info_of(packet: &Packet) -> DiscoveryInfo {
        match packet {
            Packet::Discovery(info) => info.clone(),
            _ => unreachable!(),
        }
    }

    fn from() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(203, 0, 113, 1), 12043))
    }

    fn remote() -> Ipv4Addr {
        Ipv4Addr::new(203, 0, 113, 5)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => return events,
                Err(err) => panic!("event channel failed: {err}"),
            }
        }
    }

    #[test]
    fn test_found_then_lost_after_timeout() {
        let mut client = DiscoveryClient::default();
        let mut events = client.subscribe();
        let sink = client.prepare("App", true);
        let packet = announcement("App", "Stage", remote());
        let t0 = Instant::now();

        sink.on_packet(packet.clone(), from());
        client.process(t0);
        assert_eq!(drain(&mut events), [DiscoveryEvent::ServerFound(info_of(&packet))]);
        assert_eq!(client.servers(), [info_of(&packet)]);

        client.process(t0 + Duration::from_secs(16));
        assert!(drain(&mut events).is_empty());

        client.process(t0 + Duration::from_secs(17));
        assert_eq!(drain(&mut events), [DiscoveryEvent::ServerLost(info_of(&packet))]);

        client.process(t0 + Duration::from_secs(40));
        assert!(drain(&mut events).is_empty());
        assert!(client.servers().is_empty());
    }

    #[test]
    fn test_repeated_announcements_keep_server_alive() {
        let mut client = DiscoveryClient::default();
        let mut events = client.subscribe();
        let sink = client.prepare("App", true);
        let packet = announcement("App", "Stage", remote());
        let t0 = Instant::now();

        sink.on_packet(packet.clone(), from());
        client.process(t0);
        sink.on_packet(packet.clone(), from());
        client.process(t0 + Duration::from_secs(10));
        client.process(t0 + Duration::from_secs(20));
        assert_eq!(drain(&mut events).len(), 1);

        client.process(t0 + Duration::from_secs(27));
        assert_eq!(drain(&mut events), [DiscoveryEvent::ServerLost(info_of(&packet))]);
    }

    #[test]
    fn test_configuration_change_is_lost_then_found() {
        let mut client = DiscoveryClient::default();
        let mut events = client.subscribe();
        let sink = client.prepare("App", true);
        let old = announcement("App", "Stage A", remote());
        let new = announcement("App", "Stage B", remote());
        let t0 = Instant::now();

        sink.on_packet(old.clone(), from());
        client.process(t0);
        drain(&mut events);

        sink.on_packet(new.clone(), from());
        client.process(t0 + Duration::from_secs(1));
        assert_eq!(
            drain(&mut events),
            [
                DiscoveryEvent::ServerLost(info_of(&old)),
                DiscoveryEvent::ServerFound(info_of(&new)),
            ]
        );
        assert_eq!(client.servers(), [info_of(&new)]);
    }

    #[test]
    fn test_shutdown_reports_lost_once() {
        let mut client = DiscoveryClient::default();
        let mut events = client.subscribe();
        let sink = client.prepare("App", true);
        let packet = announcement("App", "Stage", remote());
        let t0 = Instant::now();

        sink.on_packet(packet.clone(), from());
        client.process(t0);
        drain(&mut events);

        sink.on_packet(Packet::Shutdown { id: SERVER }, from());
        sink.on_packet(Packet::Shutdown { id: SERVER }, from());
        sink.on_packet(
            Packet::Shutdown {
                id: Uuid::from_u128(1),
            },
            from(),
        );
        client.process(t0 + Duration::from_millis(10));
        assert_eq!(drain(&mut events), [DiscoveryEvent::ServerLost(info_of(&packet))]);
    }

    #[test]
    fn test_other_products_and_requests_are_ignored() {
        let mut client = DiscoveryClient::default();
        let mut events = client.subscribe();
        let sink = client.prepare("App", true);

        sink.on_packet(announcement("Other", "Stage", remote()), from());
        sink.on_packet(
            Packet::Request {
                product_name: "App".into(),
            },
            from(),
        );
        client.process(Instant::now());
        assert!(drain(&mut events).is_empty());
        assert!(client.servers().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_local_servers_are_filtered_unless_requested() {
        let packet = announcement("App", "Stage", Ipv4Addr::LOCALHOST);

        let mut client = DiscoveryClient::default();
        let sink = client.prepare("App", false);
        sink.on_packet(packet.clone(), from());
        client.process(Instant::now());
        assert!(client.servers().is_empty());

        let sink = client.prepare("App", true);
        sink.on_packet(packet.clone(), from());
        client.process(Instant::now());
        assert_eq!(client.servers(), [info_of(&packet)]);
    }

    #[test]
    fn test_restart_forgets_servers_silently() {
        let mut client = DiscoveryClient::default();
        let mut events = client.subscribe();
        let sink = client.prepare("App", true);
        sink.on_packet(announcement("App", "Stage", remote()), from());
        client.process(Instant::now());
        drain(&mut events);

        let stale_sink = sink;
        let _sink = client.prepare("App", true);
        // Packets queued for the previous session are dropped with its channel.
        stale_sink.on_packet(Packet::Shutdown { id: SERVER }, from());
        client.process(Instant::now());
        assert!(client.servers().is_empty());
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_stop_reports_every_server_lost() {
        let mut client = DiscoveryClient::default();
        let mut events = client.subscribe();
        let sink = client.prepare("App", true);
        let packet = announcement("App", "Stage", remote());
        sink.on_packet(packet.clone(), from());
        client.process(Instant::now());
        drain(&mut events);

        client.stop();
        assert_eq!(drain(&mut events), [DiscoveryEvent::ServerLost(info_of(&packet))]);
        assert!(client.servers().is_empty());
    }

    #[test]
    fn test_update_is_a_no_op_when_stopped() {
        let mut client = DiscoveryClient::default();
        let mut events = client.subscribe();
        let sink = client.prepare("App", true);
        sink.on_packet(announcement("App", "Stage", remote()), from());
        client.update();
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_long_product_name_is_rejected() {
        let mut client = DiscoveryClient::default();
        assert!(client.start(&"p".repeat(33), true).is_err());
        assert!(!client.is_running());
    }

    #[test]
    fn test_every_event_of_a_busy_update_is_delivered() {
        let mut client = DiscoveryClient::default();
        let mut first = client.subscribe();
        let mut second = client.subscribe();
        let sink = client.prepare("App", true);

        let infos: Vec<DiscoveryInfo> = (0..80u128)
            .map(|n| {
                let id = Uuid::from_u128(n + 1);
                let data =
                    ServerData::new("App", format!("Stage {n}"), id, Version::new(1, 0)).unwrap();
                DiscoveryInfo::new(data, vec![SocketAddrV4::new(remote(), 9000 + n as u16)])
            })
            .collect();
        for info in &infos {
            sink.on_packet(Packet::Discovery(info.clone()), from());
        }
        client.process(Instant::now());

        let found: Vec<DiscoveryEvent> = infos
            .iter()
            .cloned()
            .map(DiscoveryEvent::ServerFound)
            .collect();
        assert_eq!(client.servers().len(), 80);
        assert_eq!(drain(&mut first), found);
        assert_eq!(drain(&mut second), found);

        client.stop();
        let lost = drain(&mut first);
        assert_eq!(lost.len(), 80);
        assert!(lost
            .iter()
            .all(|event| matches!(event, DiscoveryEvent::ServerLost(_))));
    }

    #[test]
    fn test_dropped_subscribers_are_forgotten() {
        let mut client = DiscoveryClient::default();
        let dropped = client.subscribe();
        let mut kept = client.subscribe();
        drop(dropped);

        let sink = client.prepare("App", true);
        let packet = announcement("App", "Stage", remote());
        sink.on_packet(packet.clone(), from());
        client.process(Instant::now());

        assert_eq!(client.subscribers.len(), 1);
        assert_eq!(drain(&mut kept), [DiscoveryEvent::ServerFound(info_of(&packet))]);
    }
}
