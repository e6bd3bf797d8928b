use std::fmt;

use crate::ofp_header::{OPENFLOW_0_01_VERSION, OPENFLOW_0_04_VERSION};
use crate::openflow::MsgCode;

pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;
pub const OFPP_ANY: u32 = 0xffff_ffff;
pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;
pub const OFPG_ANY: u32 = 0xffff_ffff;
pub const ALL_TABLES: u8 = 0xff;

/// Multipart/stats flag telling the receiver more fragments follow.
pub const MULTIPART_MORE: u16 = 1;

const OFPPC_PORT_DOWN: u32 = 1;
const OFPPS_LINK_DOWN: u32 = 1;

/// Version-agnostic OpenFlow message.
///
/// Matches and instruction lists are opaque, version-specific bytes; the engine never looks
/// inside them.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Hello),
    Error(ErrorMsg),
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    Experimenter(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(SwitchFeatures),
    GetConfigRequest,
    GetConfigReply(SwitchConfig),
    SetConfig(SwitchConfig),
    PacketIn(PacketIn),
    FlowRemoved(FlowRemoved),
    PortStatus(PortStatus),
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    GroupMod(Vec<u8>),
    PortMod(PortMod),
    MultipartRequest(MultipartRequest),
    MultipartReply(MultipartReply),
    BarrierRequest,
    BarrierReply,
}

impl Message {
    /// Map `Message` to associated OpenFlow message type code `MsgCode`.
    pub fn msg_code(&self) -> MsgCode {
        match *self {
            Message::Hello(_) => MsgCode::Hello,
            Message::Error(_) => MsgCode::Error,
            Message::EchoRequest(_) => MsgCode::EchoReq,
            Message::EchoReply(_) => MsgCode::EchoResp,
            Message::Experimenter(_) => MsgCode::Experimenter,
            Message::FeaturesRequest => MsgCode::FeaturesReq,
            Message::FeaturesReply(_) => MsgCode::FeaturesResp,
            Message::GetConfigRequest => MsgCode::GetConfigReq,
            Message::GetConfigReply(_) => MsgCode::GetConfigResp,
            Message::SetConfig(_) => MsgCode::SetConfig,
            Message::PacketIn(_) => MsgCode::PacketIn,
            Message::FlowRemoved(_) => MsgCode::FlowRemoved,
            Message::PortStatus(_) => MsgCode::PortStatus,
            Message::PacketOut(_) => MsgCode::PacketOut,
            Message::FlowMod(_) => MsgCode::FlowMod,
            Message::GroupMod(_) => MsgCode::GroupMod,
            Message::PortMod(_) => MsgCode::PortMod,
            Message::MultipartRequest(_) => MsgCode::MultipartReq,
            Message::MultipartReply(_) => MsgCode::MultipartResp,
            Message::BarrierRequest => MsgCode::BarrierReq,
            Message::BarrierReply => MsgCode::BarrierResp,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::MultipartRequest(req) => write!(f, "MultipartReq({:?})", req.kind),
            Message::MultipartReply(rep) => write!(f, "MultipartResp({:?})", rep.kind),
            Message::FlowMod(fm) => write!(f, "FlowMod({:?})", fm.command),
            other => write!(f, "{}", other.msg_code()),
        }
    }
}

/// Hello message. `versions` is the content of the version bitmap element, empty when the
/// peer did not send one (the header version is then its only advertisement).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hello {
    pub versions: Vec<u8>,
}

impl Hello {
    pub fn with_versions(versions: &[u8]) -> Hello {
        Hello {
            versions: versions.to_vec(),
        }
    }
}

pub const OFPET_HELLO_FAILED: u16 = 0;
pub const OFPHFC_INCOMPATIBLE: u16 = 0;
/// Error type "bad request" (shared by 1.0 and 1.3).
pub const OFPET_BAD_REQUEST: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub err_type: u16,
    pub code: u16,
    /// At least the first 64 bytes of the failed request.
    pub data: Vec<u8>,
}

impl ErrorMsg {
    pub fn hello_failed(reason: &str) -> ErrorMsg {
        ErrorMsg {
            err_type: OFPET_HELLO_FAILED,
            code: OFPHFC_INCOMPATIBLE,
            data: reason.as_bytes().to_vec(),
        }
    }
}

impl fmt::Display for ErrorMsg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "error type {} code {}", self.err_type, self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    /// Always 0 for 1.0 connections.
    pub auxiliary_id: u8,
    pub capabilities: u32,
    /// Supported actions bitmap, 1.0 only.
    pub actions: u32,
    /// Port list, 1.0 only. 1.3 switches report ports via the port-desc multipart.
    pub ports: Vec<Port>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchConfig {
    pub flags: u16,
    pub miss_send_len: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub port_no: u32,
    pub hw_addr: [u8; 6],
    pub name: String,
    pub config: u32,
    pub state: u32,
    pub curr: u32,
    pub advertised: u32,
    pub supported: u32,
    pub peer: u32,
    /// 1.3 only.
    pub curr_speed: u32,
    /// 1.3 only.
    pub max_speed: u32,
}

impl Port {
    pub fn new(port_no: u32, name: &str) -> Port {
        Port {
            port_no,
            hw_addr: [0; 6],
            name: name.to_string(),
            config: 0,
            state: 0,
            curr: 0,
            advertised: 0,
            supported: 0,
            peer: 0,
            curr_speed: 0,
            max_speed: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config & OFPPC_PORT_DOWN == 0
    }

    pub fn is_link_up(&self) -> bool {
        self.state & OFPPS_LINK_DOWN == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortReason {
    Add,
    Delete,
    Modify,
}

impl PortReason {
    pub fn of_int(v: u8) -> Option<PortReason> {
        match v {
            0 => Some(PortReason::Add),
            1 => Some(PortReason::Delete),
            2 => Some(PortReason::Modify),
            _ => None,
        }
    }

    pub fn to_int(self) -> u8 {
        match self {
            PortReason::Add => 0,
            PortReason::Delete => 1,
            PortReason::Modify => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: Port,
}

/// Flow match. `Raw` holds the OXM TLVs for 1.3, or the whole 40 byte `ofp_match` for 1.0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    All,
    Raw(Vec<u8>),
}

impl Default for Match {
    fn default() -> Match {
        Match::All
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer_id: Option<u32>,
    pub total_len: u16,
    /// Ingress port. For 1.3 this is lifted from the OXM in_port field when present.
    pub in_port: u32,
    pub reason: u8,
    /// 1.3 only.
    pub table_id: u8,
    /// 1.3 only.
    pub cookie: u64,
    /// 1.3 only, 1.0 packet-ins carry no match.
    pub pkt_match: Match,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRemoved {
    pub cookie: u64,
    pub priority: u16,
    pub reason: u8,
    pub table_id: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    pub flow_match: Match,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub buffer_id: Option<u32>,
    pub in_port: u32,
    /// Encoded action list.
    pub actions: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowModCommand {
    Add,
    Modify,
    ModifyStrict,
    Delete,
    DeleteStrict,
}

impl FlowModCommand {
    pub fn of_int(v: u16) -> Option<FlowModCommand> {
        match v {
            0 => Some(FlowModCommand::Add),
            1 => Some(FlowModCommand::Modify),
            2 => Some(FlowModCommand::ModifyStrict),
            3 => Some(FlowModCommand::Delete),
            4 => Some(FlowModCommand::DeleteStrict),
            _ => None,
        }
    }

    pub fn to_int(self) -> u16 {
        match self {
            FlowModCommand::Add => 0,
            FlowModCommand::Modify => 1,
            FlowModCommand::ModifyStrict => 2,
            FlowModCommand::Delete => 3,
            FlowModCommand::DeleteStrict => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    /// Protocol version the flow was built for. `None` when it is valid for any version.
    pub version: Option<u8>,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub table_id: u8,
    pub command: FlowModCommand,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: Option<u32>,
    pub out_port: u32,
    pub out_group: u32,
    pub flags: u16,
    pub flow_match: Match,
    /// Encoded instruction list (1.3) or action list (1.0).
    pub instructions: Vec<u8>,
}

impl FlowMod {
    pub fn new(command: FlowModCommand) -> FlowMod {
        FlowMod {
            version: None,
            cookie: 0,
            cookie_mask: 0,
            table_id: 0,
            command,
            idle_timeout: 0,
            hard_timeout: 0,
            priority: 0,
            buffer_id: None,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
            flags: 0,
            flow_match: Match::All,
            instructions: Vec::new(),
        }
    }

    /// Removes every flow entry of every table.
    pub fn delete_all() -> FlowMod {
        FlowMod {
            table_id: ALL_TABLES,
            ..FlowMod::new(FlowModCommand::Delete)
        }
    }

    /// Check the flow can be sent to a datapath speaking `version`.
    pub fn validate(&self, version: u8) -> Result<(), String> {
        if let Some(v) = self.version {
            if v != version {
                return Err(format!("built for version {}, datapath speaks {}", v, version));
            }
        }
        match self.command {
            FlowModCommand::Add | FlowModCommand::Modify | FlowModCommand::ModifyStrict => {
                if self.table_id == ALL_TABLES {
                    return Err("add/modify must target a single table".to_string());
                }
            }
            _ => (),
        }
        match (&self.flow_match, version) {
            (Match::Raw(bytes), OPENFLOW_0_01_VERSION) if bytes.len() != 40 => {
                Err(format!("1.0 match must be 40 bytes, got {}", bytes.len()))
            }
            (Match::Raw(bytes), OPENFLOW_0_04_VERSION) if !oxm_well_formed(bytes) => {
                Err("malformed OXM match".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn oxm_well_formed(mut bytes: &[u8]) -> bool {
    while !bytes.is_empty() {
        if bytes.len() < 4 {
            return false;
        }
        let len = bytes[3] as usize;
        if bytes.len() < 4 + len {
            return false;
        }
        bytes = &bytes[4 + len..];
    }
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMod {
    pub port_no: u32,
    pub hw_addr: [u8; 6],
    pub config: u32,
    pub mask: u32,
    pub advertise: u32,
}

impl PortMod {
    /// Bring a port administratively up or down, leaving the other config bits untouched.
    pub fn set_enabled(port: &Port, enable: bool) -> PortMod {
        PortMod {
            port_no: port.port_no,
            hw_addr: port.hw_addr,
            config: if enable { 0 } else { OFPPC_PORT_DOWN },
            mask: OFPPC_PORT_DOWN,
            advertise: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultipartType {
    Desc,
    Flow,
    Aggregate,
    Table,
    PortStats,
    Queue,
    Group,
    GroupDesc,
    GroupFeatures,
    Meter,
    MeterConfig,
    MeterFeatures,
    TableFeatures,
    PortDesc,
    Experimenter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartRequest {
    pub kind: MultipartType,
    pub flags: u16,
    pub body: Vec<u8>,
}

impl MultipartRequest {
    pub fn new(kind: MultipartType) -> MultipartRequest {
        MultipartRequest {
            kind,
            flags: 0,
            body: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    pub manufacturer: String,
    pub hardware: String,
    pub software: String,
    pub serial_number: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartReplyBody {
    Desc(DeviceDescriptor),
    PortDesc(Vec<Port>),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartReply {
    pub kind: MultipartType,
    pub flags: u16,
    pub body: MultipartReplyBody,
}

impl MultipartReply {
    pub fn has_more(&self) -> bool {
        self.flags & MULTIPART_MORE != 0
    }

    /// Append a following fragment of the same logical reply. The result carries the flags of
    /// the later fragment.
    pub fn merge(self, next: MultipartReply) -> MultipartReply {
        let body = match (self.body, next.body) {
            (MultipartReplyBody::PortDesc(mut ports), MultipartReplyBody::PortDesc(more)) => {
                ports.extend(more);
                MultipartReplyBody::PortDesc(ports)
            }
            (MultipartReplyBody::Raw(mut bytes), MultipartReplyBody::Raw(more)) => {
                bytes.extend(more);
                MultipartReplyBody::Raw(bytes)
            }
            (_, last) => last,
        };
        MultipartReply {
            kind: next.kind,
            flags: next.flags,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_desc_fragment(ports: &[u32], flags: u16) -> MultipartReply {
        MultipartReply {
            kind: MultipartType::PortDesc,
            flags,
            body: MultipartReplyBody::PortDesc(
                ports.iter().map(|p| Port::new(*p, &format!("eth{}", p))).collect(),
            ),
        }
    }

    #[test]
    fn test_merge_port_desc_fragments() {
        let first = port_desc_fragment(&[1, 2], MULTIPART_MORE);
        let last = port_desc_fragment(&[3], 0);
        assert!(first.has_more());
        assert!(!last.has_more());

        let merged = first.merge(last);
        assert!(!merged.has_more());
        match merged.body {
            MultipartReplyBody::PortDesc(ports) => {
                let nos: Vec<u32> = ports.iter().map(|p| p.port_no).collect();
                assert_eq!(nos, vec![1, 2, 3]);
            }
            other => assert!(false, "unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_flow_mod_validation() {
        let mut fm = FlowMod::new(FlowModCommand::Add);
        assert!(fm.validate(OPENFLOW_0_04_VERSION).is_ok());

        fm.version = Some(OPENFLOW_0_01_VERSION);
        assert!(fm.validate(OPENFLOW_0_04_VERSION).is_err());

        fm.version = None;
        fm.table_id = ALL_TABLES;
        assert!(fm.validate(OPENFLOW_0_04_VERSION).is_err());

        fm.table_id = 0;
        fm.flow_match = Match::Raw(vec![0x80, 0x00, 0x00, 0x04, 0, 0]);
        assert!(fm.validate(OPENFLOW_0_04_VERSION).is_err());
        fm.flow_match = Match::Raw(vec![0x80, 0x00, 0x00, 0x04, 0, 0, 0, 1]);
        assert!(fm.validate(OPENFLOW_0_04_VERSION).is_ok());
        assert!(fm.validate(OPENFLOW_0_01_VERSION).is_err());

        assert!(FlowMod::delete_all().validate(OPENFLOW_0_01_VERSION).is_ok());
    }

    #[test]
    fn test_port_flags() {
        let mut port = Port::new(7, "eth7");
        assert!(port.is_enabled());
        assert!(port.is_link_up());
        port.config = 1;
        port.state = 1;
        assert!(!port.is_enabled());
        assert!(!port.is_link_up());

        let pm = PortMod::set_enabled(&port, true);
        assert_eq!(pm.config, 0);
        assert_eq!(pm.mask, 1);
    }
}
