//! Discovery datagrams.
//!
//! ```text
//! [PacketType: u8][payload]
//!
//! Request:   [product name: string]
//! Shutdown:  [server id: 16 bytes]
//! Discovery: [ServerData][end point count: u8] { [IPv4: 4 bytes][port: u16] } * count
//! ```
//!
//! Every packet must fit in one [`BUFFER_SIZE`](crate::BUFFER_SIZE) datagram.

use crate::error::DiscoveryError;
use crate::info::DiscoveryInfo;
use crate::server_data::{read_uuid, ServerData};
use crate::{BUFFER_SIZE, MAX_END_POINTS};
use bytemuck::{Pod, Zeroable};
use livecapture_core::{wire_size, WireError, WireReader, WireWriter, STRING_MAX_LENGTH};
use std::net::{Ipv4Addr, SocketAddrV4};
use uuid::Uuid;

/// Kind of data carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// A client asking servers of a product to announce themselves now.
    Request = 10,
    /// A server going away.
    Shutdown = 20,
    /// A server announcing itself.
    Discovery = 30,
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(PacketType::Request),
            20 => Ok(PacketType::Shutdown),
            30 => Ok(PacketType::Discovery),
            _ => Err(WireError::InvalidEnum {
                name: "PacketType",
                value: value as i64,
            }),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PacketHeader {
    kind: u8,
}

/// Size of the header preceding every payload.
pub const HEADER_SIZE: usize = wire_size::<PacketHeader>();

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
struct EndPointData {
    address: [u8; 4],
    port: u16,
}

impl From<&SocketAddrV4> for EndPointData {
    fn from(end_point: &SocketAddrV4) -> Self {
        Self {
            address: end_point.ip().octets(),
            port: end_point.port(),
        }
    }
}

impl From<EndPointData> for SocketAddrV4 {
    fn from(data: EndPointData) -> Self {
        SocketAddrV4::new(Ipv4Addr::from(data.address), data.port)
    }
}

/// A decoded discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Ask servers of `product_name` to announce themselves.
    Request {
        /// Product filter.
        product_name: String,
    },
    /// The server with this id stopped.
    Shutdown {
        /// Id of the stopping server.
        id: Uuid,
    },
    /// A server announcement.
    Discovery(DiscoveryInfo),
}

impl Packet {
    /// The packet's type tag.
    pub fn kind(&self) -> PacketType {
        match self {
            Packet::Request { .. } => PacketType::Request,
            Packet::Shutdown { .. } => PacketType::Shutdown,
            Packet::Discovery(_) => PacketType::Discovery,
        }
    }

    /// Encode the packet into a datagram.
    ///
    /// Discovery packets hold at most [`MAX_END_POINTS`] endpoints; callers trim the
    /// list before building one. Use [`encode_datagram`](Self::encode_datagram) for
    /// anything that goes on the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_struct(&PacketHeader {
            kind: self.kind() as u8,
        });

        match self {
            Packet::Request { product_name } => out.write_string(product_name),
            Packet::Shutdown { id } => out.write_bytes(&id.to_bytes_le()),
            Packet::Discovery(info) => {
                info.server_info.write(&mut out);
                let count = info.end_points.len().min(MAX_END_POINTS);
                out.write_u8(count as u8);
                for end_point in &info.end_points[..count] {
                    out.write_struct(&EndPointData::from(end_point));
                }
            }
        }
        out
    }

    /// Encode the packet, failing if peers could not receive it in one datagram.
    pub fn encode_datagram(&self) -> Result<Vec<u8>, DiscoveryError> {
        let bytes = self.encode();
        if bytes.len() > BUFFER_SIZE {
            return Err(DiscoveryError::PacketTooLarge {
                len: bytes.len(),
                max: BUFFER_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Decode a datagram. Payloads must be consumed exactly.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(datagram);
        let header: PacketHeader = reader.read_struct()?;

        let packet = match PacketType::try_from(header.kind)? {
            PacketType::Request => Packet::Request {
                product_name: reader.read_bounded_string(STRING_MAX_LENGTH)?,
            },
            PacketType::Shutdown => Packet::Shutdown {
                id: read_uuid(&mut reader)?,
            },
            PacketType::Discovery => {
                let server_info = ServerData::read(&mut reader)?;
                let count = reader.read_u8()? as usize;
                let expected = count * wire_size::<EndPointData>();
                if reader.remaining() != expected {
                    return Err(WireError::InvalidLength(reader.remaining() as i32));
                }
                let end_points = (0..count)
                    .map(|_| reader.read_struct::<EndPointData>().map(SocketAddrV4::from))
                    .collect::<Result<Vec<_>, _>>()?;
                Packet::Discovery(DiscoveryInfo::new(server_info, end_points))
            }
        };

        reader.finish()?;
        Ok(packet)
    }
}
