//! Network helpers shared by the discovery roles.

use crate::error::{DiscoveryError, PortError};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Lowest port outside the well-known range.
pub const MIN_PORT: u16 = 1024;

/// First port of the range most systems hand out as ephemeral ports.
pub const EPHEMERAL_PORT_START: u16 = 32768;

/// Check that `port` can be used by a long-lived service.
///
/// Returns a warning for ports in the ephemeral range; those are allowed but may clash
/// with ports the OS hands out to other sockets.
pub fn validate_port(port: u16) -> Result<Option<&'static str>, PortError> {
    match port {
        0 => Err(PortError::Zero),
        p if p < MIN_PORT => Err(PortError::WellKnown(p)),
        p if p >= EPHEMERAL_PORT_START => Ok(Some(
            "ports in the range [32768, 65535] are typically ephemeral and may be in use; \
             a port between 1024 and 32767 is recommended",
        )),
        _ => Ok(None),
    }
}

/// IPv4 addresses of the interfaces that are currently up.
#[cfg(unix)]
pub fn local_ipv4_addresses(include_loopback: bool) -> Vec<Ipv4Addr> {
    let mut addresses = Vec::new();
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();

    // SAFETY: getifaddrs fills `head` with a list we own until freeifaddrs.
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        tracing::warn!(
            "Failed to enumerate network interfaces: {}",
            io::Error::last_os_error()
        );
        return addresses;
    }

    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: `cursor` walks the list returned above, which stays valid until freed.
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        let flags = entry.ifa_flags as libc::c_int;
        if flags & libc::IFF_UP == 0 {
            continue;
        }
        if !include_loopback && flags & libc::IFF_LOOPBACK != 0 {
            continue;
        }
        if entry.ifa_addr.is_null() {
            continue;
        }
        // SAFETY: non-null `ifa_addr` points at a sockaddr whose family we check first.
        let family = unsafe { (*entry.ifa_addr).sa_family } as libc::c_int;
        if family != libc::AF_INET {
            continue;
        }
        // SAFETY: AF_INET addresses are sockaddr_in.
        let raw = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
        let address = Ipv4Addr::from(u32::from_be(raw.sin_addr.s_addr));
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }

    // SAFETY: `head` came from getifaddrs and is freed exactly once.
    unsafe { libc::freeifaddrs(head) };
    addresses
}

/// IPv4 addresses of the interfaces that are currently up.
///
/// Without interface enumeration this falls back to the address the OS would route
/// public traffic from.
#[cfg(not(unix))]
pub fn local_ipv4_addresses(include_loopback: bool) -> Vec<Ipv4Addr> {
    let mut addresses = Vec::new();
    if include_loopback {
        addresses.push(Ipv4Addr::LOCALHOST);
    }
    let routed = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .ok();
    if let Some(SocketAddr::V4(addr)) = routed {
        if !addr.ip().is_unspecified() && !addr.ip().is_loopback() {
            addresses.push(*addr.ip());
        }
    }
    addresses
}

/// Number of leading bits two addresses share.
pub fn matching_prefix_bits(a: Ipv4Addr, b: Ipv4Addr) -> u32 {
    (u32::from(a) ^ u32::from(b)).leading_zeros()
}

/// The local address most likely on the same network as one of `remotes`, paired with
/// that remote.
///
/// A loopback remote always matches loopback. Otherwise the pair sharing the longest
/// address prefix wins; `None` when nothing shares even one bit.
pub fn closest_local_address(remotes: &[SocketAddrV4]) -> Option<(Ipv4Addr, SocketAddrV4)> {
    if let Some(remote) = remotes.iter().find(|remote| remote.ip().is_loopback()) {
        return Some((Ipv4Addr::LOCALHOST, *remote));
    }
    closest_of(&local_ipv4_addresses(false), remotes)
}

fn closest_of(
    locals: &[Ipv4Addr],
    remotes: &[SocketAddrV4],
) -> Option<(Ipv4Addr, SocketAddrV4)> {
    let mut best = None;
    let mut best_bits = 0;
    for &local in locals {
        for remote in remotes {
            let bits = matching_prefix_bits(local, *remote.ip());
            if bits > best_bits {
                best_bits = bits;
                best = Some((local, *remote));
            }
        }
    }
    best
}

/// Bind a UDP socket that other discovery sockets on this host may share, with
/// broadcasting enabled. The socket is left in non-blocking mode.
pub(crate) fn bind_shared_udp(addr: SocketAddrV4) -> Result<UdpSocket, DiscoveryError> {
    let bind_error = |source| DiscoveryError::Bind {
        addr: SocketAddr::V4(addr),
        source,
    };
    let socket = new_reusable_udp(addr).map_err(bind_error)?;
    socket.set_broadcast(true).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    Ok(socket)
}

#[cfg(unix)]
fn new_reusable_udp(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    use std::os::fd::{FromRawFd, OwnedFd};

    // SAFETY: plain socket creation; the fd is owned below.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` is a fresh descriptor nobody else owns; dropping `owned` closes it.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };

    set_flag(fd, libc::SO_REUSEADDR)?;
    // BSD-derived stacks only share a UDP port between sockets that all set SO_REUSEPORT.
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    set_flag(fd, libc::SO_REUSEPORT)?;

    // SAFETY: zeroed sockaddr_in is a valid starting value.
    let mut raw: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    raw.sin_family = libc::AF_INET as libc::sa_family_t;
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        raw.sin_len = std::mem::size_of::<libc::sockaddr_in>() as u8;
    }
    raw.sin_port = addr.port().to_be();
    raw.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    // SAFETY: `raw` is a fully initialised sockaddr_in of the size we pass.
    let result = unsafe {
        libc::bind(
            fd,
            &raw as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(UdpSocket::from(owned))
}

#[cfg(unix)]
fn set_flag(fd: libc::c_int, option: libc::c_int) -> io::Result<()> {
    let enabled: libc::c_int = 1;
    // SAFETY: `enabled` outlives the call and its size is passed alongside.
    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &enabled as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn new_reusable_udp(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    UdpSocket::bind(addr)
}

/// How a socket error should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    /// Harmless for datagrams, e.g. an ICMP port unreachable echo.
    Ignore,
    /// The interface set changed; send sockets should be rebuilt.
    Rebuild,
    /// The socket is being torn down.
    Teardown,
    /// Anything else; worth logging.
    Unexpected,
}

pub(crate) fn classify(err: &io::Error) -> ErrorClass {
    if let Some(class) = err.raw_os_error().and_then(classify_os) {
        return class;
    }

    match err.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::WouldBlock => ErrorClass::Ignore,
        io::ErrorKind::AddrNotAvailable => ErrorClass::Rebuild,
        io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => ErrorClass::Teardown,
        _ => ErrorClass::Unexpected,
    }
}

#[cfg(unix)]
fn classify_os(code: i32) -> Option<ErrorClass> {
    match code {
        libc::ENETUNREACH | libc::EHOSTUNREACH | libc::ENETDOWN | libc::EADDRNOTAVAIL => {
            Some(ErrorClass::Rebuild)
        }
        libc::ESHUTDOWN | libc::ECANCELED | libc::EBADF => Some(ErrorClass::Teardown),
        _ => None,
    }
}

#[cfg(not(unix))]
fn classify_os(_code: i32) -> Option<ErrorClass> {
    None
}
