//! Fuzz-style property tests for discovery datagrams.
//!
//! Anything on the LAN can send to the discovery port, so decoding must reject garbage
//! without panicking.

use livecapture_core::Version;
use livecapture_discovery::{DiscoveryError, DiscoveryInfo, Packet, ServerData, BUFFER_SIZE};
use proptest::prelude::*;
use std::net::{Ipv4Addr, SocketAddrV4};
use uuid::Uuid;

fn end_point() -> impl Strategy<Value = SocketAddrV4> {
    (any::<[u8; 4]>(), any::<u16>())
        .prop_map(|(octets, port)| SocketAddrV4::new(Ipv4Addr::from(octets), port))
}

proptest! {
    /// Property: arbitrary datagrams don't crash the decoder
    #[test]
    fn arbitrary_bytes_dont_crash_decode(
        random_bytes in prop::collection::vec(any::<u8>(), 0..BUFFER_SIZE),
    ) {
        let _result = Packet::decode(&random_bytes);
    }

    /// Property: arbitrary payloads behind a valid type tag don't crash the decoder
    #[test]
    fn tagged_garbage_doesnt_crash_decode(
        tag in prop::sample::select(vec![10u8, 20, 30]),
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut datagram = vec![tag];
        datagram.extend_from_slice(&payload);
        let _result = Packet::decode(&datagram);
    }

    /// Property: announcements either fit in one datagram and survive it, or are refused
    #[test]
    fn announcements_round_trip(
        id in any::<u128>(),
        product in "[a-zA-Z0-9 ]{0,32}",
        instance in "\\PC{0,32}",
        major in 0u32..1000,
        minor in 0u32..1000,
        end_points in prop::collection::vec(end_point(), 0..=255),
    ) {
        let data = ServerData::new(product, instance, Uuid::from_u128(id), Version::new(major, minor))
            .expect("names within limits");
        let packet = Packet::Discovery(DiscoveryInfo::new(data, end_points));
        let encoded_len = packet.encode().len();

        match packet.encode_datagram() {
            Ok(bytes) => {
                prop_assert!(bytes.len() <= BUFFER_SIZE);
                prop_assert_eq!(Packet::decode(&bytes).expect("decode"), packet);
            }
            Err(DiscoveryError::PacketTooLarge { len, max }) => {
                prop_assert_eq!(len, encoded_len);
                prop_assert_eq!(max, BUFFER_SIZE);
                prop_assert!(len > BUFFER_SIZE);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }
}
