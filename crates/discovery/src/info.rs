//! What a client knows about a discovered server.

use crate::server_data::ServerData;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddrV4;

/// A server's identity together with the endpoints it accepts connections on.
///
/// Two infos are equal when the server data and the endpoint lists match element-wise
/// in order; hashing follows the same content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DiscoveryInfo {
    /// The announcing server.
    pub server_info: ServerData,
    /// Endpoints clients can connect to.
    pub end_points: Vec<SocketAddrV4>,
}

impl DiscoveryInfo {
    /// Pair server data with its endpoints.
    pub fn new(server_info: ServerData, end_points: Vec<SocketAddrV4>) -> Self {
        Self {
            server_info,
            end_points,
        }
    }
}

impl fmt::Display for DiscoveryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at [", self.server_info)?;
        for (i, end_point) in self.end_points.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{end_point}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecapture_core::Version;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::net::Ipv4Addr;
    use uuid::Uuid;

    fn hash_of(info: &DiscoveryInfo) -> u64 {
        let mut hasher = DefaultHasher::new();
        info.hash(&mut hasher);
        hasher.finish()
    }

    fn info(ports: &[u16]) -> DiscoveryInfo {
        let data = ServerData::new("App", "Stage", Uuid::from_u128(7), Version::new(1, 2)).unwrap();
        let end_points = ports
            .iter()
            .map(|&port| SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), port))
            .collect();
        DiscoveryInfo::new(data, end_points)
    }

    #[test]
    fn test_equal_content_hashes_equal() {
        // Separately allocated endpoint lists with the same content.
        let a = info(&[9000, 9001]);
        let b = info(&[9000, 9001]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_endpoint_order_matters() {
        assert_ne!(info(&[9000, 9001]), info(&[9001, 9000]));
        assert_ne!(info(&[9000]), info(&[9000, 9001]));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            info(&[9000]).to_string(),
            format!("App \"Stage\" v1.2 ({}) at [10.0.0.5:9000]", Uuid::from_u128(7))
        );
    }
}
