use crate::message::Message;
use crate::ofp_header::{OfpHeader, Xid, OFP_HEADER_LENGTH, OPENFLOW_0_01_VERSION, OPENFLOW_0_04_VERSION};
use crate::ofp_message::{OfpSerializationError, WireCodec};
use crate::openflow::MsgCode;
use crate::{openflow0x01, openflow0x04};

/// Default `WireCodec` speaking OpenFlow 1.0 and 1.3.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfpCodec;

impl OfpCodec {
    pub fn new() -> OfpCodec {
        OfpCodec
    }
}

pub fn marshal(version: u8, xid: Xid, message: &Message) -> Result<Vec<u8>, OfpSerializationError> {
    let code = message.msg_code();
    let type_code = code
        .to_wire(version)
        .ok_or(OfpSerializationError::UnsupportedMessageCode { version, code })?;

    let mut bytes = Vec::with_capacity(64);
    // length is patched in once the body is known
    OfpHeader::new(version, type_code, 0, xid).marshal(&mut bytes);
    match version {
        OPENFLOW_0_01_VERSION => openflow0x01::message::marshal_body(message, &mut bytes)?,
        OPENFLOW_0_04_VERSION => openflow0x04::message::marshal_body(message, &mut bytes)?,
        v => return Err(OfpSerializationError::UnsupportedVersion { version: v }),
    }

    let length = bytes.len();
    if length > u16::max_value() as usize {
        return Err(OfpSerializationError::TooLong { code, length });
    }
    bytes[2..4].copy_from_slice(&(length as u16).to_be_bytes());
    Ok(bytes)
}

pub fn parse(header: &OfpHeader, body: &[u8]) -> Result<Message, OfpSerializationError> {
    let version = header.version();
    let code = match MsgCode::from_wire(version, header.type_code()) {
        Some(code) => code,
        None if header.type_code() == 0 => MsgCode::Hello,
        None if crate::ofp_header::is_supported_version(version) => {
            return Err(OfpSerializationError::UnsupportedTypeCode {
                version,
                code: header.type_code(),
            })
        }
        None => return Err(OfpSerializationError::UnsupportedVersion { version }),
    };
    let expected = header.length().saturating_sub(OFP_HEADER_LENGTH);
    if body.len() < expected {
        return Err(OfpSerializationError::Truncated {
            needed: expected,
            available: body.len(),
        });
    }
    let body = &body[..expected];
    match version {
        OPENFLOW_0_01_VERSION => openflow0x01::message::parse_body(code, body),
        OPENFLOW_0_04_VERSION => openflow0x04::message::parse_body(code, body),
        // Hello from a version we don't speak: still parse the bitmap so negotiation can run.
        _ => openflow0x04::message::parse_body(MsgCode::Hello, body),
    }
}

impl WireCodec for OfpCodec {
    fn encode(&self, version: u8, xid: Xid, msg: &Message) -> Result<Vec<u8>, OfpSerializationError> {
        marshal(version, xid, msg)
    }

    fn parse(&self, header: &OfpHeader, body: &[u8]) -> Result<Message, OfpSerializationError> {
        parse(header, body)
    }
}
