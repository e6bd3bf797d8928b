use byteorder::{BigEndian, ByteOrder};
use bytes::BufMut;

use crate::ofp_message::OfpSerializationError;

pub const OFP_HEADER_LENGTH: usize = 8;

pub type Xid = u32;

pub const OPENFLOW_0_01_VERSION: u8 = 1; // 1.0
pub const OPENFLOW_0_04_VERSION: u8 = 4; // 1.3

/// Protocol versions this controller can speak, lowest first.
pub const SUPPORTED_VERSIONS: [u8; 2] = [OPENFLOW_0_01_VERSION, OPENFLOW_0_04_VERSION];

pub fn is_supported_version(version: u8) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: Xid,
}

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: Xid) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub fn size() -> usize {
        OFP_HEADER_LENGTH
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal<B: BufMut>(&self, bytes: &mut B) {
        bytes.put_u8(self.version);
        bytes.put_u8(self.typ);
        bytes.put_u16(self.length);
        bytes.put_u32(self.xid);
    }

    /// Takes a message buffer (at least header sized) and returns an `OfpHeader`.
    pub fn parse(buf: &[u8]) -> Result<Self, OfpSerializationError> {
        if buf.len() < OFP_HEADER_LENGTH {
            return Err(OfpSerializationError::Truncated {
                needed: OFP_HEADER_LENGTH,
                available: buf.len(),
            });
        }
        Ok(OfpHeader {
            version: buf[0],
            typ: buf[1],
            length: BigEndian::read_u16(&buf[2..4]),
            xid: BigEndian::read_u32(&buf[4..8]),
        })
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Raw wire type code. Its meaning depends on `version`.
    pub fn type_code(&self) -> u8 {
        self.typ
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    ///  Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> Xid {
        self.xid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_marshal_parse() {
        let header = OfpHeader::new(OPENFLOW_0_04_VERSION, 5, 8, 0x12345678);
        let mut bytes = Vec::new();
        header.marshal(&mut bytes);
        assert_eq!(bytes, vec![4, 5, 0, 8, 0x12, 0x34, 0x56, 0x78]);

        let parsed = OfpHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.length(), 8);
    }

    #[test]
    fn test_parse_short_header() {
        match OfpHeader::parse(&[1, 0, 0]) {
            Err(OfpSerializationError::Truncated { needed, available }) => {
                assert_eq!(needed, 8);
                assert_eq!(available, 3);
            }
            other => assert!(false, "unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_supported_versions() {
        assert!(is_supported_version(1));
        assert!(is_supported_version(4));
        assert!(!is_supported_version(2));
        assert!(!is_supported_version(5));
    }
}
