use std::collections::HashMap;

use crate::message::{DeviceDescriptor, MultipartReply, MultipartReplyBody, MultipartType, Port};
use crate::ofp_header::{Xid, OPENFLOW_0_04_VERSION};

/// Per-connection handshake progress. `Closed` and `Revoked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    VersionNegotiating,
    BasicHandshake,
    ExtendedHandshake,
    PostHandshake,
    Ready,
    Closed,
    Revoked,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        match self {
            HandshakeState::Closed | HandshakeState::Revoked => true,
            _ => false,
        }
    }
}

/// Pick the protocol version for a connection.
///
/// `peer_header_version` is the version field of the peer's hello, `peer_bitmap` the versions
/// it listed in a version bitmap element (empty if it sent none). `local` is sorted ascending.
pub fn negotiate_version(local: &[u8], peer_header_version: u8, peer_bitmap: &[u8]) -> Option<u8> {
    if !peer_bitmap.is_empty() {
        return local.iter().rev().find(|v| peer_bitmap.contains(v)).cloned();
    }
    let local_max = *local.last()?;
    let candidate = local_max.min(peer_header_version);
    if local.contains(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

/// Which of the description exchanges a reply or error completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptionKind {
    Device,
    Ports,
    TableFeatures,
}

impl DescriptionKind {
    pub fn multipart_type(self) -> MultipartType {
        match self {
            DescriptionKind::Device => MultipartType::Desc,
            DescriptionKind::Ports => MultipartType::PortDesc,
            DescriptionKind::TableFeatures => MultipartType::TableFeatures,
        }
    }

    /// Description exchanges applicable to `version`.
    pub fn required_for(version: u8) -> Vec<DescriptionKind> {
        if version >= OPENFLOW_0_04_VERSION {
            vec![DescriptionKind::Device, DescriptionKind::Ports, DescriptionKind::TableFeatures]
        } else {
            vec![DescriptionKind::Device]
        }
    }
}

/// Collects the concurrent description replies of the extended handshake.
#[derive(Debug, Default)]
pub struct ExtendedHandshake {
    outstanding: HashMap<Xid, DescriptionKind>,
    descriptor: Option<DeviceDescriptor>,
    ports: Option<Vec<Port>>,
    no_table_features: bool,
}

impl ExtendedHandshake {
    pub fn new() -> ExtendedHandshake {
        ExtendedHandshake::default()
    }

    pub fn expect(&mut self, xid: Xid, kind: DescriptionKind) {
        self.outstanding.insert(xid, kind);
    }

    pub fn is_expecting(&self, xid: Xid) -> bool {
        self.outstanding.contains_key(&xid)
    }

    /// Feed a multipart reply. Returns false if it did not belong to the handshake.
    pub fn on_reply(&mut self, xid: Xid, reply: &MultipartReply) -> bool {
        let kind = match self.outstanding.get(&xid) {
            Some(kind) => *kind,
            None => return false,
        };
        match (&reply.body, kind) {
            (MultipartReplyBody::Desc(desc), DescriptionKind::Device) => {
                self.descriptor = Some(desc.clone());
            }
            (MultipartReplyBody::PortDesc(ports), DescriptionKind::Ports) => {
                self.ports.get_or_insert_with(Vec::new).extend(ports.iter().cloned());
            }
            (_, DescriptionKind::TableFeatures) => (),
            (_, kind) => {
                warn!("Unexpected {:?} reply for {:?} description", reply.kind, kind);
            }
        }
        if !reply.has_more() {
            self.outstanding.remove(&xid);
        }
        true
    }

    /// Feed an error. An error on the table-features request means the datapath doesn't
    /// support it; any other description error is still counted as complete.
    pub fn on_error(&mut self, xid: Xid) -> Option<DescriptionKind> {
        let kind = self.outstanding.remove(&xid)?;
        if kind == DescriptionKind::TableFeatures {
            self.no_table_features = true;
        }
        Some(kind)
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn descriptor(&self) -> Option<&DeviceDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn take_ports(&mut self) -> Option<Vec<Port>> {
        self.ports.take()
    }

    pub fn no_table_features(&self) -> bool {
        self.no_table_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MULTIPART_MORE;

    const LOCAL: [u8; 2] = [1, 4];

    #[test]
    fn test_negotiate_without_bitmap() {
        assert_eq!(negotiate_version(&LOCAL, 4, &[]), Some(4));
        assert_eq!(negotiate_version(&LOCAL, 1, &[]), Some(1));
        // newer peers fall back to our highest
        assert_eq!(negotiate_version(&LOCAL, 6, &[]), Some(4));
        // min(4, 3) = 3 which we don't speak
        assert_eq!(negotiate_version(&LOCAL, 3, &[]), None);
        assert_eq!(negotiate_version(&[], 4, &[]), None);
    }

    #[test]
    fn test_negotiate_with_bitmap() {
        assert_eq!(negotiate_version(&LOCAL, 6, &[1, 4, 6]), Some(4));
        assert_eq!(negotiate_version(&LOCAL, 4, &[1]), Some(1));
        assert_eq!(negotiate_version(&LOCAL, 5, &[2, 3, 5]), None);
    }

    #[test]
    fn test_negotiated_is_min_for_supported_pairs() {
        for local_max in LOCAL.iter() {
            let local: Vec<u8> = LOCAL.iter().cloned().filter(|v| v <= local_max).collect();
            for peer in LOCAL.iter() {
                let expected = (*local_max).min(*peer);
                assert_eq!(negotiate_version(&local, *peer, &[]), Some(expected));
            }
        }
    }

    fn reply(kind: MultipartType, flags: u16, body: MultipartReplyBody) -> MultipartReply {
        MultipartReply { kind, flags, body }
    }

    #[test]
    fn test_extended_handshake_1_3() {
        let mut ext = ExtendedHandshake::new();
        for (i, kind) in DescriptionKind::required_for(4).into_iter().enumerate() {
            ext.expect(100 + i as u32, kind);
        }
        assert!(!ext.is_complete());

        let desc = DeviceDescriptor {
            manufacturer: "Acme".to_string(),
            ..Default::default()
        };
        assert!(ext.on_reply(100, &reply(MultipartType::Desc, 0, MultipartReplyBody::Desc(desc))));
        assert!(ext.on_reply(
            101,
            &reply(MultipartType::PortDesc, MULTIPART_MORE, MultipartReplyBody::PortDesc(vec![Port::new(1, "a")]))
        ));
        assert!(ext.is_expecting(101));
        assert!(ext.on_reply(
            101,
            &reply(MultipartType::PortDesc, 0, MultipartReplyBody::PortDesc(vec![Port::new(2, "b")]))
        ));
        assert!(!ext.is_complete());

        assert_eq!(ext.on_error(102), Some(DescriptionKind::TableFeatures));
        assert!(ext.no_table_features());
        assert!(ext.is_complete());
        assert_eq!(ext.descriptor().unwrap().manufacturer, "Acme");
        assert_eq!(ext.take_ports().unwrap().len(), 2);
    }

    #[test]
    fn test_extended_handshake_1_0_only_needs_desc() {
        assert_eq!(DescriptionKind::required_for(1), vec![DescriptionKind::Device]);
        let mut ext = ExtendedHandshake::new();
        ext.expect(5, DescriptionKind::Device);
        assert!(!ext.on_reply(6, &reply(MultipartType::Desc, 0, MultipartReplyBody::Raw(vec![]))));
        assert!(ext.on_reply(5, &reply(MultipartType::Desc, 0, MultipartReplyBody::Desc(Default::default()))));
        assert!(ext.is_complete());
        assert!(!ext.no_table_features());
    }
}
