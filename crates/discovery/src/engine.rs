//! UDP broadcast engine shared by the discovery client and server.
//!
//! One socket bound to `0.0.0.0:port` receives every discovery datagram on the host.
//! Sending goes through one socket per local interface address so broadcasts leave on
//! every network. Send sockets are rebuilt from [`DiscoveryEngine::maintain`] when a
//! send reports that the interface set changed, never from the receive task.

use crate::error::DiscoveryError;
use crate::net_util::{bind_shared_udp, classify, local_ipv4_addresses, validate_port, ErrorClass};
use crate::packet::{Packet, HEADER_SIZE};
use crate::BUFFER_SIZE;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Receives decoded packets from the engine's receive task.
///
/// Runs on a runtime worker, so implementations only queue work or touch shared state.
pub(crate) trait PacketSink: Send + Sync + 'static {
    fn on_packet(&self, packet: Packet, from: SocketAddr);
}

/// How a broadcast waits for the datagrams to leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendMode {
    /// Hand the datagrams to spawned tasks and return.
    Async,
    /// Send before returning. Used for the final shutdown notice.
    Immediate,
}

/// Local addresses broadcasts are sent from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SendAddresses {
    /// Every non-loopback interface.
    AllLocal,
    /// Only these addresses, when they belong to an interface that is up.
    Only(Vec<Ipv4Addr>),
}

impl SendAddresses {
    fn resolve(&self) -> Vec<Ipv4Addr> {
        let local = local_ipv4_addresses(false);
        match self {
            SendAddresses::AllLocal => local,
            SendAddresses::Only(wanted) => local
                .into_iter()
                .filter(|address| wanted.contains(address))
                .collect(),
        }
    }
}

struct SendState {
    role: &'static str,
    target: SocketAddr,
    runtime: Handle,
    sockets: RwLock<Vec<Arc<UdpSocket>>>,
    rebuild: AtomicBool,
}

impl SendState {
    fn on_send_error(&self, err: &io::Error) {
        match classify(err) {
            ErrorClass::Ignore | ErrorClass::Teardown => {}
            ErrorClass::Rebuild => {
                debug!(role = self.role, "Send failed ({err}), rebuilding send sockets");
                self.rebuild.store(true, Ordering::Release);
            }
            ErrorClass::Unexpected => {
                error!(role = self.role, "Failed to send discovery packet: {err}")
            }
        }
    }
}

/// Cloneable handle that fans a packet out on every send socket.
#[derive(Clone)]
pub(crate) struct Broadcaster {
    state: Arc<SendState>,
}

impl Broadcaster {
    fn new(role: &'static str, port: u16, runtime: Handle) -> Self {
        Self {
            state: Arc::new(SendState {
                role,
                target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port)),
                runtime,
                sockets: RwLock::new(Vec::new()),
                rebuild: AtomicBool::new(false),
            }),
        }
    }

    /// Send `packet` on every send socket.
    pub(crate) fn broadcast(&self, packet: &Arc<[u8]>, mode: SendMode) {
        let sockets = self
            .state
            .sockets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for socket in sockets {
            match mode {
                SendMode::Immediate => {
                    if let Err(err) = socket.try_send_to(packet, self.state.target) {
                        self.state.on_send_error(&err);
                    }
                }
                SendMode::Async => {
                    let state = self.state.clone();
                    let packet = packet.clone();
                    self.state.runtime.spawn(async move {
                        if let Err(err) = socket.send_to(&packet, state.target).await {
                            state.on_send_error(&err);
                        }
                    });
                }
            }
        }
    }

    /// Number of interfaces currently broadcast on.
    pub(crate) fn socket_count(&self) -> usize {
        self.state
            .sockets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn needs_rebuild(&self) -> bool {
        self.state.rebuild.load(Ordering::Acquire)
    }

    fn request_rebuild(&self) {
        self.state.rebuild.store(true, Ordering::Release);
    }

    fn rebuild(&self, addresses: &SendAddresses) {
        let _runtime = self.state.runtime.enter();
        let mut sockets = Vec::new();

        for address in addresses.resolve() {
            match self.open_send_socket(address) {
                Ok(socket) => sockets.push(Arc::new(socket)),
                // Interfaces that are still coming up fail here; the next rebuild retries.
                Err(err) => debug!(role = self.state.role, %address, "Skipping interface: {err}"),
            }
        }

        debug!(role = self.state.role, count = sockets.len(), "Created send sockets");
        *self
            .state
            .sockets
            .write()
            .unwrap_or_else(PoisonError::into_inner) = sockets;
        self.state.rebuild.store(false, Ordering::Release);
    }

    fn open_send_socket(&self, address: Ipv4Addr) -> Result<UdpSocket, DiscoveryError> {
        let bind_addr = SocketAddrV4::new(address, 0);
        let socket = bind_shared_udp(bind_addr)?;
        let bind_error = |source| DiscoveryError::Bind {
            addr: SocketAddr::V4(bind_addr),
            source,
        };

        // An empty broadcast tells us whether this interface supports broadcasting.
        socket.send_to(&[], self.state.target).map_err(bind_error)?;
        UdpSocket::from_std(socket).map_err(bind_error)
    }

    fn clear(&self) {
        self.state
            .sockets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

struct Running {
    receive_task: JoinHandle<()>,
    broadcaster: Broadcaster,
    send_addresses: SendAddresses,
}

/// Socket lifecycle and packet framing for one discovery role.
pub(crate) struct DiscoveryEngine {
    role: &'static str,
    port: u16,
    running: Option<Running>,
}

impl DiscoveryEngine {
    pub(crate) fn new(role: &'static str, port: u16) -> Self {
        Self {
            role,
            port,
            running: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Takes effect on the next start.
    pub(crate) fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Bind the receive socket, spawn the receive task on the current runtime and open
    /// the send sockets. A running engine is stopped first.
    pub(crate) fn start<F>(
        &mut self,
        send_addresses: SendAddresses,
        make_sink: F,
    ) -> Result<Broadcaster, DiscoveryError>
    where
        F: FnOnce(Broadcaster) -> Arc<dyn PacketSink>,
    {
        self.stop();

        if let Some(warning) = validate_port(self.port)? {
            warn!(role = self.role, port = self.port, "{warning}");
        }
        let runtime = Handle::try_current().map_err(|_| DiscoveryError::NoRuntime)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port);
        let receive_socket = {
            let _runtime = runtime.enter();
            UdpSocket::from_std(bind_shared_udp(bind_addr)?).map_err(|source| {
                DiscoveryError::Bind {
                    addr: SocketAddr::V4(bind_addr),
                    source,
                }
            })?
        };

        let broadcaster = Broadcaster::new(self.role, self.port, runtime.clone());
        let sink = make_sink(broadcaster.clone());
        let receive_task = runtime.spawn(receive_loop(
            self.role,
            receive_socket,
            sink,
            broadcaster.clone(),
        ));
        broadcaster.rebuild(&send_addresses);

        debug!(role = self.role, port = self.port, "Discovery started");
        self.running = Some(Running {
            receive_task,
            broadcaster: broadcaster.clone(),
            send_addresses,
        });
        Ok(broadcaster)
    }

    /// Close every socket. Safe to call when stopped.
    pub(crate) fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.receive_task.abort();
            running.broadcaster.clear();
            debug!(role = self.role, "Discovery stopped");
        }
    }

    /// Rebuild the send sockets if a send asked for it.
    pub(crate) fn maintain(&self) {
        if let Some(running) = &self.running {
            if running.broadcaster.needs_rebuild() {
                running.broadcaster.rebuild(&running.send_addresses);
            }
        }
    }

    pub(crate) fn broadcast(&self, packet: &Arc<[u8]>, mode: SendMode) {
        if let Some(running) = &self.running {
            running.broadcaster.broadcast(packet, mode);
        }
    }
}

impl Drop for DiscoveryEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn receive_loop(
    role: &'static str,
    socket: UdpSocket,
    sink: Arc<dyn PacketSink>,
    broadcaster: Broadcaster,
) {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((len, from)) => {
                if len < HEADER_SIZE {
                    continue;
                }
                match Packet::decode(&buffer[..len]) {
                    Ok(packet) => sink.on_packet(packet, from),
                    Err(err) => trace!(role, %from, "Ignoring malformed packet: {err}"),
                }
            }
            Err(err) => match classify(&err) {
                ErrorClass::Ignore | ErrorClass::Teardown => {}
                ErrorClass::Rebuild => broadcaster.request_rebuild(),
                ErrorClass::Unexpected => error!(role, "Failed to receive discovery packet: {err}"),
            },
        }
    }
}
