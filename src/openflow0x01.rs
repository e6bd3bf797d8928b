use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;

use crate::message::*;
use crate::ofp_header::OPENFLOW_0_01_VERSION;
use crate::ofp_message::OfpSerializationError;
use crate::ofp_utils::{
    ensure_remaining, port_from_0x01, port_to_0x01, read_bytes, read_fixed_size_string,
    read_hw_addr, read_rest, remaining, skip, write_fixed_size_string, write_padding_bytes,
};
use crate::openflow0x04::{marshal_desc, parse_desc};

const OFP_MATCH_LENGTH: usize = 40;
const OFP_PHY_PORT_LENGTH: usize = 48;
/// Every wildcard bit set, including full nw_src/nw_dst masks.
const OFPFW_ALL: u32 = (1 << 22) - 1;

create_empty_wrapper!(Match, Match0x01);

impl Match0x01 {
    fn all_wildcards() -> Vec<u8> {
        let mut bytes = Vec::with_capacity(OFP_MATCH_LENGTH);
        bytes.put_u32(OFPFW_ALL);
        write_padding_bytes(&mut bytes, OFP_MATCH_LENGTH - 4);
        bytes
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Match, OfpSerializationError> {
        let raw = read_bytes(bytes, OFP_MATCH_LENGTH)?;
        if raw == Match0x01::all_wildcards() {
            Ok(Match::All)
        } else {
            Ok(Match::Raw(raw))
        }
    }

    fn marshal(m: &Match, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        match m {
            Match::All => bytes.put_slice(&Match0x01::all_wildcards()),
            Match::Raw(raw) if raw.len() == OFP_MATCH_LENGTH => bytes.put_slice(raw),
            Match::Raw(raw) => {
                return Err(OfpSerializationError::unexpected(raw.len(), "length", "ofp_match"));
            }
        }
        Ok(())
    }
}

create_empty_wrapper!(Port, Port0x01);

impl Port0x01 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Port, OfpSerializationError> {
        ensure_remaining(bytes, OFP_PHY_PORT_LENGTH)?;
        let port_no = port_from_0x01(bytes.read_u16::<BigEndian>()?);
        let hw_addr = read_hw_addr(bytes)?;
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
            curr_speed: 0,
            max_speed: 0,
        })
    }

    fn marshal(port: &Port, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.put_u16(port_to_0x01(port.port_no)?);
        bytes.put_slice(&port.hw_addr);
        write_fixed_size_string(bytes, &port.name, 16);
        bytes.put_u32(port.config);
        bytes.put_u32(port.state);
        bytes.put_u32(port.curr);
        bytes.put_u32(port.advertised);
        bytes.put_u32(port.supported);
        bytes.put_u32(port.peer);
        Ok(())
    }
}

create_empty_wrapper!(SwitchFeatures, SwitchFeatures0x01);

impl SwitchFeatures0x01 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<SwitchFeatures, OfpSerializationError> {
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        skip(bytes, 3)?;
        let capabilities = bytes.read_u32::<BigEndian>()?;
        let actions = bytes.read_u32::<BigEndian>()?;
        let mut ports = Vec::new();
        while remaining(bytes) > 0 {
            ports.push(Port0x01::parse(bytes)?);
        }
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            auxiliary_id: 0,
            capabilities,
            actions,
            ports,
        })
    }

    fn marshal(sf: &SwitchFeatures, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.put_u64(sf.datapath_id);
        bytes.put_u32(sf.num_buffers);
        bytes.put_u8(sf.num_tables);
        write_padding_bytes(bytes, 3);
        bytes.put_u32(sf.capabilities);
        bytes.put_u32(sf.actions);
        for port in &sf.ports {
            Port0x01::marshal(port, bytes)?;
        }
        Ok(())
    }
}

fn buffer_id_of(raw: u32) -> Option<u32> {
    if raw == OFP_NO_BUFFER {
        None
    } else {
        Some(raw)
    }
}

create_empty_wrapper!(PacketIn, PacketIn0x01);

impl PacketIn0x01 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PacketIn, OfpSerializationError> {
        let buffer_id = buffer_id_of(bytes.read_u32::<BigEndian>()?);
        let total_len = bytes.read_u16::<BigEndian>()?;
        let in_port = port_from_0x01(bytes.read_u16::<BigEndian>()?);
        let reason = bytes.read_u8()?;
        skip(bytes, 1)?;
        Ok(PacketIn {
            buffer_id,
            total_len,
            in_port,
            reason,
            table_id: 0,
            cookie: 0,
            pkt_match: Match::All,
            data: read_rest(bytes),
        })
    }

    fn marshal(pi: &PacketIn, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.put_u32(pi.buffer_id.unwrap_or(OFP_NO_BUFFER));
        bytes.put_u16(pi.total_len);
        bytes.put_u16(port_to_0x01(pi.in_port)?);
        bytes.put_u8(pi.reason);
        write_padding_bytes(bytes, 1);
        bytes.put_slice(&pi.data);
        Ok(())
    }
}

create_empty_wrapper!(FlowRemoved, FlowRemoved0x01);

impl FlowRemoved0x01 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<FlowRemoved, OfpSerializationError> {
        let flow_match = Match0x01::parse(bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let priority = bytes.read_u16::<BigEndian>()?;
        let reason = bytes.read_u8()?;
        skip(bytes, 1)?;
        let duration_sec = bytes.read_u32::<BigEndian>()?;
        let duration_nsec = bytes.read_u32::<BigEndian>()?;
        let idle_timeout = bytes.read_u16::<BigEndian>()?;
        skip(bytes, 2)?;
        Ok(FlowRemoved {
            cookie,
            priority,
            reason,
            table_id: 0,
            duration_sec,
            duration_nsec,
            idle_timeout,
            hard_timeout: 0,
            packet_count: bytes.read_u64::<BigEndian>()?,
            byte_count: bytes.read_u64::<BigEndian>()?,
            flow_match,
        })
    }

    fn marshal(fr: &FlowRemoved, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        Match0x01::marshal(&fr.flow_match, bytes)?;
        bytes.put_u64(fr.cookie);
        bytes.put_u16(fr.priority);
        bytes.put_u8(fr.reason);
        write_padding_bytes(bytes, 1);
        bytes.put_u32(fr.duration_sec);
        bytes.put_u32(fr.duration_nsec);
        bytes.put_u16(fr.idle_timeout);
        write_padding_bytes(bytes, 2);
        bytes.put_u64(fr.packet_count);
        bytes.put_u64(fr.byte_count);
        Ok(())
    }
}

create_empty_wrapper!(PacketOut, PacketOut0x01);

impl PacketOut0x01 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PacketOut, OfpSerializationError> {
        let buffer_id = buffer_id_of(bytes.read_u32::<BigEndian>()?);
        let in_port = port_from_0x01(bytes.read_u16::<BigEndian>()?);
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        let actions = read_bytes(bytes, actions_len)?;
        Ok(PacketOut {
            buffer_id,
            in_port,
            actions,
            data: read_rest(bytes),
        })
    }

    fn marshal(po: &PacketOut, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.put_u32(po.buffer_id.unwrap_or(OFP_NO_BUFFER));
        bytes.put_u16(port_to_0x01(po.in_port)?);
        bytes.put_u16(po.actions.len() as u16);
        bytes.put_slice(&po.actions);
        bytes.put_slice(&po.data);
        Ok(())
    }
}

create_empty_wrapper!(FlowMod, FlowMod0x01);

impl FlowMod0x01 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<FlowMod, OfpSerializationError> {
        let flow_match = Match0x01::parse(bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let raw_command = bytes.read_u16::<BigEndian>()?;
        let command = FlowModCommand::of_int(raw_command)
            .ok_or_else(|| OfpSerializationError::unexpected(raw_command, "command", "FlowMod"))?;
        let idle_timeout = bytes.read_u16::<BigEndian>()?;
        let hard_timeout = bytes.read_u16::<BigEndian>()?;
        let priority = bytes.read_u16::<BigEndian>()?;
        let buffer_id = buffer_id_of(bytes.read_u32::<BigEndian>()?);
        let out_port = port_from_0x01(bytes.read_u16::<BigEndian>()?);
        let flags = bytes.read_u16::<BigEndian>()?;
        Ok(FlowMod {
            version: Some(OPENFLOW_0_01_VERSION),
            cookie,
            cookie_mask: 0,
            // 1.0 has a single table; deletes apply to it regardless.
            table_id: if command == FlowModCommand::Delete { ALL_TABLES } else { 0 },
            command,
            idle_timeout,
            hard_timeout,
            priority,
            buffer_id,
            out_port,
            out_group: OFPG_ANY,
            flags,
            flow_match,
            instructions: read_rest(bytes),
        })
    }

    fn marshal(fm: &FlowMod, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        Match0x01::marshal(&fm.flow_match, bytes)?;
        bytes.put_u64(fm.cookie);
        bytes.put_u16(fm.command.to_int());
        bytes.put_u16(fm.idle_timeout);
        bytes.put_u16(fm.hard_timeout);
        bytes.put_u16(fm.priority);
        bytes.put_u32(fm.buffer_id.unwrap_or(OFP_NO_BUFFER));
        bytes.put_u16(port_to_0x01(fm.out_port)?);
        bytes.put_u16(fm.flags);
        bytes.put_slice(&fm.instructions);
        Ok(())
    }
}

create_empty_wrapper!(PortMod, PortMod0x01);

impl PortMod0x01 {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PortMod, OfpSerializationError> {
        let port_no = port_from_0x01(bytes.read_u16::<BigEndian>()?);
        let hw_addr = read_hw_addr(bytes)?;
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

    fn marshal(pm: &PortMod, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.put_u16(port_to_0x01(pm.port_no)?);
        bytes.put_slice(&pm.hw_addr);
        bytes.put_u32(pm.config);
        bytes.put_u32(pm.mask);
        bytes.put_u32(pm.advertise);
        write_padding_bytes(bytes, 4);
        Ok(())
    }
}

create_empty_wrapper!(MultipartType, StatsType0x01);

impl StatsType0x01 {
    fn of_int(v: u16) -> Result<MultipartType, OfpSerializationError> {
        let kind = match v {
            0 => MultipartType::Desc,
            1 => MultipartType::Flow,
            2 => MultipartType::Aggregate,
            3 => MultipartType::Table,
            4 => MultipartType::PortStats,
            5 => MultipartType::Queue,
            0xffff => MultipartType::Experimenter,
            other => return Err(OfpSerializationError::unexpected(other, "type", "ofp_stats")),
        };
        Ok(kind)
    }

    fn to_int(kind: MultipartType) -> Result<u16, OfpSerializationError> {
        let v = match kind {
            MultipartType::Desc => 0,
            MultipartType::Flow => 1,
            MultipartType::Aggregate => 2,
            MultipartType::Table => 3,
            MultipartType::PortStats => 4,
            MultipartType::Queue => 5,
            MultipartType::Experimenter => 0xffff,
            other => {
                return Err(OfpSerializationError::unexpected(
                    format!("{:?}", other),
                    "type",
                    "ofp_stats (1.0)",
                ))
            }
        };
        Ok(v)
    }
}

/// Encapsulates handling of whole message bodies for OpenFlow 1.0.
pub mod message {
    use super::*;
    use crate::openflow::MsgCode;

    /// Marshal the body of `msg`, header excluded.
    pub fn marshal_body(msg: &Message, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        match msg {
            // 1.0 hellos carry no elements
            Message::Hello(_) => (),
            Message::Error(err) => {
                bytes.put_u16(err.err_type);
                bytes.put_u16(err.code);
                bytes.put_slice(&err.data);
            }
            Message::EchoRequest(buf) | Message::EchoReply(buf) | Message::Experimenter(buf) => {
                bytes.put_slice(buf)
            }
            Message::FeaturesRequest
            | Message::GetConfigRequest
            | Message::BarrierRequest
            | Message::BarrierReply => (),
            Message::FeaturesReply(sf) => SwitchFeatures0x01::marshal(sf, bytes)?,
            Message::GetConfigReply(config) | Message::SetConfig(config) => {
                bytes.put_u16(config.flags);
                bytes.put_u16(config.miss_send_len);
            }
            Message::PacketIn(pi) => PacketIn0x01::marshal(pi, bytes)?,
            Message::FlowRemoved(fr) => FlowRemoved0x01::marshal(fr, bytes)?,
            Message::PortStatus(ps) => {
                bytes.put_u8(ps.reason.to_int());
                write_padding_bytes(bytes, 7);
                Port0x01::marshal(&ps.desc, bytes)?;
            }
            Message::PacketOut(po) => PacketOut0x01::marshal(po, bytes)?,
            Message::FlowMod(fm) => FlowMod0x01::marshal(fm, bytes)?,
            Message::PortMod(pm) => PortMod0x01::marshal(pm, bytes)?,
            Message::MultipartRequest(req) => {
                bytes.put_u16(StatsType0x01::to_int(req.kind)?);
                bytes.put_u16(req.flags);
                bytes.put_slice(&req.body);
            }
            Message::MultipartReply(rep) => {
                bytes.put_u16(StatsType0x01::to_int(rep.kind)?);
                bytes.put_u16(rep.flags);
                match &rep.body {
                    MultipartReplyBody::Desc(desc) => marshal_desc(desc, bytes),
                    MultipartReplyBody::Raw(raw) => bytes.put_slice(raw),
                    MultipartReplyBody::PortDesc(_) => {
                        return Err(OfpSerializationError::UnsupportedMessageCode {
                            version: OPENFLOW_0_01_VERSION,
                            code: MsgCode::MultipartResp,
                        })
                    }
                }
            }
            Message::GroupMod(_) => {
                return Err(OfpSerializationError::UnsupportedMessageCode {
                    version: OPENFLOW_0_01_VERSION,
                    code: MsgCode::GroupMod,
                })
            }
        }
        Ok(())
    }

    /// Parse a message body of type `code`.
    pub fn parse_body(code: MsgCode, buf: &[u8]) -> Result<Message, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let msg = match code {
            MsgCode::Hello => Message::Hello(Hello::default()),
            MsgCode::Error => {
                let err_type = bytes.read_u16::<BigEndian>()?;
                let code = bytes.read_u16::<BigEndian>()?;
                Message::Error(ErrorMsg {
                    err_type,
                    code,
                    data: read_rest(&mut bytes),
                })
            }
            MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
            MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
            MsgCode::Experimenter => Message::Experimenter(buf.to_vec()),
            MsgCode::FeaturesReq => Message::FeaturesRequest,
            MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures0x01::parse(&mut bytes)?),
            MsgCode::GetConfigReq => Message::GetConfigRequest,
            MsgCode::GetConfigResp | MsgCode::SetConfig => {
                let config = SwitchConfig {
                    flags: bytes.read_u16::<BigEndian>()?,
                    miss_send_len: bytes.read_u16::<BigEndian>()?,
                };
                if code == MsgCode::SetConfig {
                    Message::SetConfig(config)
                } else {
                    Message::GetConfigReply(config)
                }
            }
            MsgCode::PacketIn => Message::PacketIn(PacketIn0x01::parse(&mut bytes)?),
            MsgCode::FlowRemoved => Message::FlowRemoved(FlowRemoved0x01::parse(&mut bytes)?),
            MsgCode::PortStatus => {
                let raw = bytes.read_u8()?;
                let reason = PortReason::of_int(raw)
                    .ok_or_else(|| OfpSerializationError::unexpected(raw, "reason", "PortStatus"))?;
                skip(&mut bytes, 7)?;
                Message::PortStatus(PortStatus {
                    reason,
                    desc: Port0x01::parse(&mut bytes)?,
                })
            }
            MsgCode::PacketOut => Message::PacketOut(PacketOut0x01::parse(&mut bytes)?),
            MsgCode::FlowMod => Message::FlowMod(FlowMod0x01::parse(&mut bytes)?),
            MsgCode::PortMod => Message::PortMod(PortMod0x01::parse(&mut bytes)?),
            MsgCode::MultipartReq => {
                let kind = StatsType0x01::of_int(bytes.read_u16::<BigEndian>()?)?;
                let flags = bytes.read_u16::<BigEndian>()?;
                Message::MultipartRequest(MultipartRequest {
                    kind,
                    flags,
                    body: read_rest(&mut bytes),
                })
            }
            MsgCode::MultipartResp => {
                let kind = StatsType0x01::of_int(bytes.read_u16::<BigEndian>()?)?;
                let flags = bytes.read_u16::<BigEndian>()?;
                let body = match kind {
                    MultipartType::Desc => MultipartReplyBody::Desc(parse_desc(&mut bytes)?),
                    _ => MultipartReplyBody::Raw(read_rest(&mut bytes)),
                };
                Message::MultipartReply(MultipartReply { kind, flags, body })
            }
            MsgCode::BarrierReq => Message::BarrierRequest,
            MsgCode::BarrierResp => Message::BarrierReply,
            code => {
                return Err(OfpSerializationError::UnsupportedMessageCode {
                    version: OPENFLOW_0_01_VERSION,
                    code,
                })
            }
        };
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::message::*;
    use super::*;
    use crate::openflow::MsgCode;

    const TEST_DPID: u64 = 0x0011_2233_4455_6677;

    #[test]
    fn test_features_reply_with_ports() {
        let mut local = Port::new(0xffff_fffe, "local");
        local.hw_addr = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        let sf = SwitchFeatures {
            datapath_id: TEST_DPID,
            num_buffers: 256,
            num_tables: 1,
            auxiliary_id: 0,
            capabilities: 0xc7,
            actions: 0xfff,
            ports: vec![Port::new(1, "eth1"), local],
        };
        let mut bytes = Vec::new();
        marshal_body(&Message::FeaturesReply(sf.clone()), &mut bytes).unwrap();
        assert_eq!(bytes.len(), 24 + 2 * OFP_PHY_PORT_LENGTH);

        match parse_body(MsgCode::FeaturesResp, &bytes).unwrap() {
            Message::FeaturesReply(parsed) => assert_eq!(parsed, sf),
            other => assert!(false, "unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_delete_all_flow_mod() {
        let mut bytes = Vec::new();
        marshal_body(&Message::FlowMod(FlowMod::delete_all()), &mut bytes).unwrap();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..4], &[0x00, 0x3f, 0xff, 0xff]);
        // command
        assert_eq!(&bytes[48..50], &[0, 3]);
        // out_port OFPP_NONE
        assert_eq!(&bytes[60..62], &[0xff, 0xff]);

        match parse_body(MsgCode::FlowMod, &bytes).unwrap() {
            Message::FlowMod(fm) => {
                assert_eq!(fm.command, FlowModCommand::Delete);
                assert_eq!(fm.flow_match, Match::All);
                assert_eq!(fm.out_port, OFPP_ANY);
            }
            other => assert!(false, "unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_port_desc_is_not_a_1_0_stat() {
        let req = Message::MultipartRequest(MultipartRequest::new(MultipartType::PortDesc));
        let mut bytes = Vec::new();
        assert!(marshal_body(&req, &mut bytes).is_err());
    }

    #[test]
    fn test_packet_in_controller_port() {
        let mut bytes = Vec::new();
        bytes.put_u32(OFP_NO_BUFFER);
        bytes.put_u16(2);
        bytes.put_u16(0xfffd);
        bytes.put_u8(1);
        bytes.put_u8(0);
        bytes.put_slice(&[1, 2]);
        match parse_body(MsgCode::PacketIn, &bytes).unwrap() {
            Message::PacketIn(pi) => {
                assert_eq!(pi.buffer_id, None);
                assert_eq!(pi.in_port, OFPP_CONTROLLER);
                assert_eq!(pi.data, vec![1, 2]);
            }
            other => assert!(false, "unexpected message {:?}", other),
        }
    }
}
