//! Identity a discovery server announces.

use crate::error::DiscoveryError;
use livecapture_core::wire::check_string_length;
use livecapture_core::{Version, WireError, WireReader, WireWriter, STRING_MAX_LENGTH};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Who a server is: a stable id, the product it belongs to, a human-readable
/// instance name and the product version.
///
/// On the wire: `[id: 16 bytes][product name: string][instance name: string]
/// [version: 4 x i32]`. The id uses the mixed-endian GUID byte order so peers built on
/// other runtimes read the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServerData {
    id: Uuid,
    product_name: String,
    instance_name: String,
    version: Version,
}

impl ServerData {
    /// Describe a server. Names longer than 32 characters are rejected.
    pub fn new(
        product_name: impl Into<String>,
        instance_name: impl Into<String>,
        id: Uuid,
        version: Version,
    ) -> Result<Self, DiscoveryError> {
        let product_name = product_name.into();
        let instance_name = instance_name.into();
        check_string_length(&product_name, STRING_MAX_LENGTH)?;
        check_string_length(&instance_name, STRING_MAX_LENGTH)?;

        Ok(Self {
            id,
            product_name,
            instance_name,
            version,
        })
    }

    /// Stable server id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Product the server belongs to; clients only track matching products.
    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    /// Display name of this server instance.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Product version.
    pub fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.write_bytes(&self.id.to_bytes_le());
        out.write_string(&self.product_name);
        out.write_string(&self.instance_name);
        for part in self.version.to_wire() {
            out.write_i32(part);
        }
    }

    pub(crate) fn read(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let id = read_uuid(reader)?;
        let product_name = reader.read_bounded_string(STRING_MAX_LENGTH)?;
        let instance_name = reader.read_bounded_string(STRING_MAX_LENGTH)?;
        let version = Version::from_wire([
            reader.read_i32()?,
            reader.read_i32()?,
            reader.read_i32()?,
            reader.read_i32()?,
        ]);

        Ok(Self {
            id,
            product_name,
            instance_name,
            version,
        })
    }
}

impl fmt::Display for ServerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} \"{}\" v{} ({})",
            self.product_name, self.instance_name, self.version, self.id
        )
    }
}

pub(crate) fn read_uuid(reader: &mut WireReader<'_>) -> Result<Uuid, WireError> {
    let bytes: [u8; 16] = reader.read_struct()?;
    Ok(Uuid::from_bytes_le(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_limit() {
        let id = Uuid::new_v4();
        assert!(ServerData::new("x".repeat(32), "ok", id, Version::default()).is_ok());
        assert!(matches!(
            ServerData::new("x".repeat(33), "ok", id, Version::default()),
            Err(DiscoveryError::Wire(WireError::StringTooLong { len: 33, .. }))
        ));
        assert!(ServerData::new("ok", "y".repeat(40), id, Version::default()).is_err());
    }

    #[test]
    fn test_id_uses_guid_byte_order() {
        let id = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let data = ServerData::new("App", "Stage", id, Version::new(1, 0)).unwrap();
        let mut buf = Vec::new();
        data.write(&mut buf);
        assert_eq!(&buf[..8], &[0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66]);
        assert_eq!(&buf[8..16], &[0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        let mut reader = WireReader::new(&buf);
        assert_eq!(ServerData::read(&mut reader).unwrap(), data);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_oversized_name_on_wire_is_rejected() {
        let mut buf = Vec::new();
        buf.write_bytes(&[0; 16]);
        buf.write_string(&"p".repeat(64));
        buf.write_string("i");
        assert!(ServerData::read(&mut WireReader::new(&buf)).is_err());
    }
}
