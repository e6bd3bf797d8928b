use std::convert::TryFrom;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;

use crate::message::*;
use crate::ofp_header::OPENFLOW_0_04_VERSION;
use crate::ofp_message::OfpSerializationError;
use crate::ofp_utils::{
    ensure_remaining, pad_to_8, read_bytes, read_fixed_size_string, read_hw_addr, read_rest,
    remaining, skip, write_fixed_size_string, write_padding_bytes,
};

const OFPHET_VERSIONBITMAP: u16 = 1;
const OFPMT_OXM: u16 = 1;
const OFP_PORT_LENGTH: usize = 64;
const OXM_OF_IN_PORT: u32 = 0x8000_0004;

create_empty_wrapper!(Hello, Hello0x04);

impl Hello0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Hello, OfpSerializationError> {
        let mut versions = Vec::new();
        while remaining(bytes) >= 4 {
            let typ = bytes.read_u16::<BigEndian>()?;
            let length = bytes.read_u16::<BigEndian>()? as usize;
            if length < 4 {
                return Err(OfpSerializationError::unexpected(length, "element length", "Hello"));
            }
            let payload = read_bytes(bytes, length - 4)?;
            if typ == OFPHET_VERSIONBITMAP {
                for (word_idx, word) in payload.chunks(4).enumerate() {
                    let mut w = 0u32;
                    for b in word {
                        w = (w << 8) | *b as u32;
                    }
                    for bit in 0..32 {
                        if w & (1 << bit) == 0 {
                            continue;
                        }
                        // versions past 255 cannot be spoken by anyone
                        if let Ok(version) = u8::try_from(word_idx * 32 + bit) {
                            versions.push(version);
                        }
                    }
                }
            }
            let padding = (length + 7) / 8 * 8 - length;
            skip(bytes, padding.min(remaining(bytes)))?;
        }
        Ok(Hello { versions })
    }

    fn marshal(hello: &Hello, bytes: &mut Vec<u8>) {
        if hello.versions.is_empty() {
            return;
        }
        let max = hello.versions.iter().cloned().max().unwrap_or(0) as usize;
        let words = max / 32 + 1;
        let mut bitmap = vec![0u32; words];
        for v in &hello.versions {
            bitmap[*v as usize / 32] |= 1 << (*v as u32 % 32);
        }
        let length = 4 + 4 * words;
        bytes.put_u16(OFPHET_VERSIONBITMAP);
        bytes.put_u16(length as u16);
        for w in bitmap {
            bytes.put_u32(w);
        }
        pad_to_8(bytes);
    }
}

create_empty_wrapper!(ErrorMsg, ErrorMsg0x04);

impl ErrorMsg0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<ErrorMsg, OfpSerializationError> {
        let err_type = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        Ok(ErrorMsg {
            err_type,
            code,
            data: read_rest(bytes),
        })
    }

    fn marshal(err: &ErrorMsg, bytes: &mut Vec<u8>) {
        bytes.put_u16(err.err_type);
        bytes.put_u16(err.code);
        bytes.put_slice(&err.data);
    }
}

create_empty_wrapper!(Match, Match0x04);

impl Match0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Match, OfpSerializationError> {
        let typ = bytes.read_u16::<BigEndian>()?;
        if typ != OFPMT_OXM {
            return Err(OfpSerializationError::unexpected(typ, "match type", "ofp_match"));
        }
        let length = bytes.read_u16::<BigEndian>()? as usize;
        if length < 4 {
            return Err(OfpSerializationError::unexpected(length, "match length", "ofp_match"));
        }
        let oxm = read_bytes(bytes, length - 4)?;
        let padding = (length + 7) / 8 * 8 - length;
        skip(bytes, padding)?;
        if oxm.is_empty() {
            Ok(Match::All)
        } else {
            Ok(Match::Raw(oxm))
        }
    }

    fn marshal(m: &Match, bytes: &mut Vec<u8>) {
        let oxm: &[u8] = match m {
            Match::All => &[],
            Match::Raw(raw) => raw,
        };
        let length = 4 + oxm.len();
        bytes.put_u16(OFPMT_OXM);
        bytes.put_u16(length as u16);
        bytes.put_slice(oxm);
        let padding = (length + 7) / 8 * 8 - length;
        write_padding_bytes(bytes, padding);
    }

    /// Extract the in_port OXM field, if present.
    fn in_port(m: &Match) -> Option<u32> {
        let mut oxm: &[u8] = match m {
            Match::All => return None,
            Match::Raw(raw) => raw,
        };
        while oxm.len() >= 4 {
            let header = u32::from_be_bytes([oxm[0], oxm[1], oxm[2], oxm[3]]);
            let len = oxm[3] as usize;
            if oxm.len() < 4 + len {
                return None;
            }
            if header == OXM_OF_IN_PORT {
                let v = &oxm[4..8];
                return Some(u32::from_be_bytes([v[0], v[1], v[2], v[3]]));
            }
            oxm = &oxm[4 + len..];
        }
        None
    }
}

create_empty_wrapper!(Port, Port0x04);

impl Port0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Port, OfpSerializationError> {
        ensure_remaining(bytes, OFP_PORT_LENGTH)?;
        let port_no = bytes.read_u32::<BigEndian>()?;
        skip(bytes, 4)?;
        let hw_addr = read_hw_addr(bytes)?;
        skip(bytes, 2)?;
        let name = read_fixed_size_string(bytes, 16)?;
        Ok(Port {
            port_no,
            hw_addr,
            name,
            config: bytes.read_u32::<BigEndian>()?,
            state: bytes.read_u32::<BigEndian>()?,
            curr: bytes.read_u32::<BigEndian>()?,
            advertised: bytes.read_u32::<BigEndian>()?,
            supported: bytes.read_u32::<BigEndian>()?,
            peer: bytes.read_u32::<BigEndian>()?,
            curr_speed: bytes.read_u32::<BigEndian>()?,
            max_speed: bytes.read_u32::<BigEndian>()?,
        })
    }

    fn marshal(port: &Port, bytes: &mut Vec<u8>) {
        bytes.put_u32(port.port_no);
        write_padding_bytes(bytes, 4);
        bytes.put_slice(&port.hw_addr);
        write_padding_bytes(bytes, 2);
        write_fixed_size_string(bytes, &port.name, 16);
        bytes.put_u32(port.config);
        bytes.put_u32(port.state);
        bytes.put_u32(port.curr);
        bytes.put_u32(port.advertised);
        bytes.put_u32(port.supported);
        bytes.put_u32(port.peer);
        bytes.put_u32(port.curr_speed);
        bytes.put_u32(port.max_speed);
    }
}

create_empty_wrapper!(SwitchFeatures, SwitchFeatures0x04);

impl SwitchFeatures0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<SwitchFeatures, OfpSerializationError> {
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        let auxiliary_id = bytes.read_u8()?;
        skip(bytes, 2)?;
        let capabilities = bytes.read_u32::<BigEndian>()?;
        // reserved
        skip(bytes, 4)?;
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            auxiliary_id,
            capabilities,
            actions: 0,
            ports: Vec::new(),
        })
    }

    fn marshal(sf: &SwitchFeatures, bytes: &mut Vec<u8>) {
        bytes.put_u64(sf.datapath_id);
        bytes.put_u32(sf.num_buffers);
        bytes.put_u8(sf.num_tables);
        bytes.put_u8(sf.auxiliary_id);
        write_padding_bytes(bytes, 2);
        bytes.put_u32(sf.capabilities);
        bytes.put_u32(0);
    }
}

fn parse_switch_config(bytes: &mut Cursor<&[u8]>) -> Result<SwitchConfig, OfpSerializationError> {
    Ok(SwitchConfig {
        flags: bytes.read_u16::<BigEndian>()?,
        miss_send_len: bytes.read_u16::<BigEndian>()?,
    })
}

fn marshal_switch_config(config: &SwitchConfig, bytes: &mut Vec<u8>) {
    bytes.put_u16(config.flags);
    bytes.put_u16(config.miss_send_len);
}

fn buffer_id_of(raw: u32) -> Option<u32> {
    if raw == OFP_NO_BUFFER {
        None
    } else {
        Some(raw)
    }
}

create_empty_wrapper!(PacketIn, PacketIn0x04);

impl PacketIn0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PacketIn, OfpSerializationError> {
        let buffer_id = buffer_id_of(bytes.read_u32::<BigEndian>()?);
        let total_len = bytes.read_u16::<BigEndian>()?;
        let reason = bytes.read_u8()?;
        let table_id = bytes.read_u8()?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let pkt_match = Match0x04::parse(bytes)?;
        skip(bytes, 2)?;
        let in_port = Match0x04::in_port(&pkt_match).unwrap_or(OFPP_ANY);
        Ok(PacketIn {
            buffer_id,
            total_len,
            in_port,
            reason,
            table_id,
            cookie,
            pkt_match,
            data: read_rest(bytes),
        })
    }

    fn marshal(pi: &PacketIn, bytes: &mut Vec<u8>) {
        bytes.put_u32(pi.buffer_id.unwrap_or(OFP_NO_BUFFER));
        bytes.put_u16(pi.total_len);
        bytes.put_u8(pi.reason);
        bytes.put_u8(pi.table_id);
        bytes.put_u64(pi.cookie);
        Match0x04::marshal(&pi.pkt_match, bytes);
        write_padding_bytes(bytes, 2);
        bytes.put_slice(&pi.data);
    }
}

create_empty_wrapper!(FlowRemoved, FlowRemoved0x04);

impl FlowRemoved0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<FlowRemoved, OfpSerializationError> {
        let cookie = bytes.read_u64::<BigEndian>()?;
        let priority = bytes.read_u16::<BigEndian>()?;
        let reason = bytes.read_u8()?;
        let table_id = bytes.read_u8()?;
        let duration_sec = bytes.read_u32::<BigEndian>()?;
        let duration_nsec = bytes.read_u32::<BigEndian>()?;
        let idle_timeout = bytes.read_u16::<BigEndian>()?;
        let hard_timeout = bytes.read_u16::<BigEndian>()?;
        let packet_count = bytes.read_u64::<BigEndian>()?;
        let byte_count = bytes.read_u64::<BigEndian>()?;
        let flow_match = Match0x04::parse(bytes)?;
        Ok(FlowRemoved {
            cookie,
            priority,
            reason,
            table_id,
            duration_sec,
            duration_nsec,
            idle_timeout,
            hard_timeout,
            packet_count,
            byte_count,
            flow_match,
        })
    }

    fn marshal(fr: &FlowRemoved, bytes: &mut Vec<u8>) {
        bytes.put_u64(fr.cookie);
        bytes.put_u16(fr.priority);
        bytes.put_u8(fr.reason);
        bytes.put_u8(fr.table_id);
        bytes.put_u32(fr.duration_sec);
        bytes.put_u32(fr.duration_nsec);
        bytes.put_u16(fr.idle_timeout);
        bytes.put_u16(fr.hard_timeout);
        bytes.put_u64(fr.packet_count);
        bytes.put_u64(fr.byte_count);
        Match0x04::marshal(&fr.flow_match, bytes);
    }
}

create_empty_wrapper!(PortStatus, PortStatus0x04);

impl PortStatus0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PortStatus, OfpSerializationError> {
        let raw = bytes.read_u8()?;
        let reason = PortReason::of_int(raw)
            .ok_or_else(|| OfpSerializationError::unexpected(raw, "reason", "PortStatus"))?;
        skip(bytes, 7)?;
        Ok(PortStatus {
            reason,
            desc: Port0x04::parse(bytes)?,
        })
    }

    fn marshal(ps: &PortStatus, bytes: &mut Vec<u8>) {
        bytes.put_u8(ps.reason.to_int());
        write_padding_bytes(bytes, 7);
        Port0x04::marshal(&ps.desc, bytes);
    }
}

create_empty_wrapper!(PacketOut, PacketOut0x04);

impl PacketOut0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PacketOut, OfpSerializationError> {
        let buffer_id = buffer_id_of(bytes.read_u32::<BigEndian>()?);
        let in_port = bytes.read_u32::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        skip(bytes, 6)?;
        let actions = read_bytes(bytes, actions_len)?;
        Ok(PacketOut {
            buffer_id,
            in_port,
            actions,
            data: read_rest(bytes),
        })
    }

    fn marshal(po: &PacketOut, bytes: &mut Vec<u8>) {
        bytes.put_u32(po.buffer_id.unwrap_or(OFP_NO_BUFFER));
        bytes.put_u32(po.in_port);
        bytes.put_u16(po.actions.len() as u16);
        write_padding_bytes(bytes, 6);
        bytes.put_slice(&po.actions);
        bytes.put_slice(&po.data);
    }
}

create_empty_wrapper!(FlowMod, FlowMod0x04);

impl FlowMod0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<FlowMod, OfpSerializationError> {
        let cookie = bytes.read_u64::<BigEndian>()?;
        let cookie_mask = bytes.read_u64::<BigEndian>()?;
        let table_id = bytes.read_u8()?;
        let raw_command = bytes.read_u8()?;
        let command = FlowModCommand::of_int(raw_command as u16)
            .ok_or_else(|| OfpSerializationError::unexpected(raw_command, "command", "FlowMod"))?;
        let idle_timeout = bytes.read_u16::<BigEndian>()?;
        let hard_timeout = bytes.read_u16::<BigEndian>()?;
        let priority = bytes.read_u16::<BigEndian>()?;
        let buffer_id = buffer_id_of(bytes.read_u32::<BigEndian>()?);
        let out_port = bytes.read_u32::<BigEndian>()?;
        let out_group = bytes.read_u32::<BigEndian>()?;
        let flags = bytes.read_u16::<BigEndian>()?;
        skip(bytes, 2)?;
        let flow_match = Match0x04::parse(bytes)?;
        Ok(FlowMod {
            version: Some(OPENFLOW_0_04_VERSION),
            cookie,
            cookie_mask,
            table_id,
            command,
            idle_timeout,
            hard_timeout,
            priority,
            buffer_id,
            out_port,
            out_group,
            flags,
            flow_match,
            instructions: read_rest(bytes),
        })
    }

    fn marshal(fm: &FlowMod, bytes: &mut Vec<u8>) {
        bytes.put_u64(fm.cookie);
        bytes.put_u64(fm.cookie_mask);
        bytes.put_u8(fm.table_id);
        bytes.put_u8(fm.command.to_int() as u8);
        bytes.put_u16(fm.idle_timeout);
        bytes.put_u16(fm.hard_timeout);
        bytes.put_u16(fm.priority);
        bytes.put_u32(fm.buffer_id.unwrap_or(OFP_NO_BUFFER));
        bytes.put_u32(fm.out_port);
        bytes.put_u32(fm.out_group);
        bytes.put_u16(fm.flags);
        write_padding_bytes(bytes, 2);
        Match0x04::marshal(&fm.flow_match, bytes);
        bytes.put_slice(&fm.instructions);
    }
}

create_empty_wrapper!(PortMod, PortMod0x04);

impl PortMod0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PortMod, OfpSerializationError> {
        let port_no = bytes.read_u32::<BigEndian>()?;
        skip(bytes, 4)?;
        let hw_addr = read_hw_addr(bytes)?;
        skip(bytes, 2)?;
        let pm = PortMod {
            port_no,
            hw_addr,
            config: bytes.read_u32::<BigEndian>()?,
            mask: bytes.read_u32::<BigEndian>()?,
            advertise: bytes.read_u32::<BigEndian>()?,
        };
        skip(bytes, 4)?;
        Ok(pm)
    }

    fn marshal(pm: &PortMod, bytes: &mut Vec<u8>) {
        bytes.put_u32(pm.port_no);
        write_padding_bytes(bytes, 4);
        bytes.put_slice(&pm.hw_addr);
        write_padding_bytes(bytes, 2);
        bytes.put_u32(pm.config);
        bytes.put_u32(pm.mask);
        bytes.put_u32(pm.advertise);
        write_padding_bytes(bytes, 4);
    }
}

create_empty_wrapper!(MultipartType, MultipartType0x04);

impl MultipartType0x04 {
    fn of_int(v: u16) -> Result<MultipartType, OfpSerializationError> {
        let kind = match v {
            0 => MultipartType::Desc,
            1 => MultipartType::Flow,
            2 => MultipartType::Aggregate,
            3 => MultipartType::Table,
            4 => MultipartType::PortStats,
            5 => MultipartType::Queue,
            6 => MultipartType::Group,
            7 => MultipartType::GroupDesc,
            8 => MultipartType::GroupFeatures,
            9 => MultipartType::Meter,
            10 => MultipartType::MeterConfig,
            11 => MultipartType::MeterFeatures,
            12 => MultipartType::TableFeatures,
            13 => MultipartType::PortDesc,
            0xffff => MultipartType::Experimenter,
            other => {
                return Err(OfpSerializationError::unexpected(other, "type", "ofp_multipart"));
            }
        };
        Ok(kind)
    }

    fn to_int(kind: MultipartType) -> u16 {
        match kind {
            MultipartType::Desc => 0,
            MultipartType::Flow => 1,
            MultipartType::Aggregate => 2,
            MultipartType::Table => 3,
            MultipartType::PortStats => 4,
            MultipartType::Queue => 5,
            MultipartType::Group => 6,
            MultipartType::GroupDesc => 7,
            MultipartType::GroupFeatures => 8,
            MultipartType::Meter => 9,
            MultipartType::MeterConfig => 10,
            MultipartType::MeterFeatures => 11,
            MultipartType::TableFeatures => 12,
            MultipartType::PortDesc => 13,
            MultipartType::Experimenter => 0xffff,
        }
    }
}

/// Device descriptor strings share one layout across versions.
pub(crate) fn parse_desc(bytes: &mut Cursor<&[u8]>) -> Result<DeviceDescriptor, OfpSerializationError> {
    Ok(DeviceDescriptor {
        manufacturer: read_fixed_size_string(bytes, 256)?,
        hardware: read_fixed_size_string(bytes, 256)?,
        software: read_fixed_size_string(bytes, 256)?,
        serial_number: read_fixed_size_string(bytes, 32)?,
        description: read_fixed_size_string(bytes, 256)?,
    })
}

pub(crate) fn marshal_desc(desc: &DeviceDescriptor, bytes: &mut Vec<u8>) {
    write_fixed_size_string(bytes, &desc.manufacturer, 256);
    write_fixed_size_string(bytes, &desc.hardware, 256);
    write_fixed_size_string(bytes, &desc.software, 256);
    write_fixed_size_string(bytes, &desc.serial_number, 32);
    write_fixed_size_string(bytes, &desc.description, 256);
}

create_empty_wrapper!(MultipartReply, MultipartReply0x04);

impl MultipartReply0x04 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<MultipartReply, OfpSerializationError> {
        let kind = MultipartType0x04::of_int(bytes.read_u16::<BigEndian>()?)?;
        let flags = bytes.read_u16::<BigEndian>()?;
        skip(bytes, 4)?;
        let body = match kind {
            MultipartType::Desc => MultipartReplyBody::Desc(parse_desc(bytes)?),
            MultipartType::PortDesc => {
                let mut ports = Vec::new();
                while remaining(bytes) > 0 {
                    ports.push(Port0x04::parse(bytes)?);
                }
                MultipartReplyBody::PortDesc(ports)
            }
            _ => MultipartReplyBody::Raw(read_rest(bytes)),
        };
        Ok(MultipartReply { kind, flags, body })
    }

    fn marshal(rep: &MultipartReply, bytes: &mut Vec<u8>) {
        bytes.put_u16(MultipartType0x04::to_int(rep.kind));
        bytes.put_u16(rep.flags);
        write_padding_bytes(bytes, 4);
        match &rep.body {
            MultipartReplyBody::Desc(desc) => marshal_desc(desc, bytes),
            MultipartReplyBody::PortDesc(ports) => {
                for port in ports {
                    Port0x04::marshal(port, bytes);
                }
            }
            MultipartReplyBody::Raw(raw) => bytes.put_slice(raw),
        }
    }
}

/// Encapsulates handling of whole message bodies for OpenFlow 1.3.
pub mod message {
    use super::*;
    use crate::openflow::MsgCode;

    /// Marshal the body of `msg`, header excluded.
    pub fn marshal_body(msg: &Message, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        match msg {
            Message::Hello(hello) => Hello0x04::marshal(hello, bytes),
            Message::Error(err) => ErrorMsg0x04::marshal(err, bytes),
            Message::EchoRequest(buf) | Message::EchoReply(buf) | Message::Experimenter(buf) => {
                bytes.put_slice(buf)
            }
            Message::FeaturesRequest
            | Message::GetConfigRequest
            | Message::BarrierRequest
            | Message::BarrierReply => (),
            Message::FeaturesReply(sf) => SwitchFeatures0x04::marshal(sf, bytes),
            Message::GetConfigReply(config) | Message::SetConfig(config) => {
                marshal_switch_config(config, bytes)
            }
            Message::PacketIn(pi) => PacketIn0x04::marshal(pi, bytes),
            Message::FlowRemoved(fr) => FlowRemoved0x04::marshal(fr, bytes),
            Message::PortStatus(ps) => PortStatus0x04::marshal(ps, bytes),
            Message::PacketOut(po) => PacketOut0x04::marshal(po, bytes),
            Message::FlowMod(fm) => FlowMod0x04::marshal(fm, bytes),
            Message::GroupMod(raw) => bytes.put_slice(raw),
            Message::PortMod(pm) => PortMod0x04::marshal(pm, bytes),
            Message::MultipartRequest(req) => {
                bytes.put_u16(MultipartType0x04::to_int(req.kind));
                bytes.put_u16(req.flags);
                write_padding_bytes(bytes, 4);
                bytes.put_slice(&req.body);
            }
            Message::MultipartReply(rep) => MultipartReply0x04::marshal(rep, bytes),
        }
        Ok(())
    }

    /// Parse a message body of type `code`.
    pub fn parse_body(code: MsgCode, buf: &[u8]) -> Result<Message, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let msg = match code {
            MsgCode::Hello => Message::Hello(Hello0x04::parse(&mut bytes)?),
            MsgCode::Error => Message::Error(ErrorMsg0x04::parse(&mut bytes)?),
            MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
            MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
            MsgCode::Experimenter => Message::Experimenter(buf.to_vec()),
            MsgCode::FeaturesReq => Message::FeaturesRequest,
            MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures0x04::parse(&mut bytes)?),
            MsgCode::GetConfigReq => Message::GetConfigRequest,
            MsgCode::GetConfigResp => Message::GetConfigReply(parse_switch_config(&mut bytes)?),
            MsgCode::SetConfig => Message::SetConfig(parse_switch_config(&mut bytes)?),
            MsgCode::PacketIn => Message::PacketIn(PacketIn0x04::parse(&mut bytes)?),
            MsgCode::FlowRemoved => Message::FlowRemoved(FlowRemoved0x04::parse(&mut bytes)?),
            MsgCode::PortStatus => Message::PortStatus(PortStatus0x04::parse(&mut bytes)?),
            MsgCode::PacketOut => Message::PacketOut(PacketOut0x04::parse(&mut bytes)?),
            MsgCode::FlowMod => Message::FlowMod(FlowMod0x04::parse(&mut bytes)?),
            MsgCode::GroupMod => Message::GroupMod(buf.to_vec()),
            MsgCode::PortMod => Message::PortMod(PortMod0x04::parse(&mut bytes)?),
            MsgCode::MultipartReq => {
                let kind = MultipartType0x04::of_int(bytes.read_u16::<BigEndian>()?)?;
                let flags = bytes.read_u16::<BigEndian>()?;
                skip(&mut bytes, 4)?;
                Message::MultipartRequest(MultipartRequest {
                    kind,
                    flags,
                    body: read_rest(&mut bytes),
                })
            }
            MsgCode::MultipartResp => Message::MultipartReply(MultipartReply0x04::parse(&mut bytes)?),
            MsgCode::BarrierReq => Message::BarrierRequest,
            MsgCode::BarrierResp => Message::BarrierReply,
            code => {
                return Err(OfpSerializationError::UnsupportedMessageCode {
                    version: OPENFLOW_0_04_VERSION,
                    code,
                })
            }
        };
        Ok(msg)
    }
}
