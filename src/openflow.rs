use std::fmt::{Display, Error, Formatter};

use crate::ofp_header::{OPENFLOW_0_01_VERSION, OPENFLOW_0_04_VERSION};

/// OpenFlow message type codes, used by headers to identify meaning of the rest of a message.
///
/// The numeric value on the wire depends on the protocol version, see `from_wire` and `to_wire`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Experimenter,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    GroupMod,
    PortMod,
    TableMod,
    MultipartReq,
    MultipartResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
    RoleReq,
    RoleResp,
}

/// Which side of a connection is allowed to originate a message type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Symmetric,
    ControllerToSwitch,
    SwitchToController,
}

const CODES_0X01: [MsgCode; 22] = [
    MsgCode::Hello,
    MsgCode::Error,
    MsgCode::EchoReq,
    MsgCode::EchoResp,
    MsgCode::Experimenter,
    MsgCode::FeaturesReq,
    MsgCode::FeaturesResp,
    MsgCode::GetConfigReq,
    MsgCode::GetConfigResp,
    MsgCode::SetConfig,
    MsgCode::PacketIn,
    MsgCode::FlowRemoved,
    MsgCode::PortStatus,
    MsgCode::PacketOut,
    MsgCode::FlowMod,
    MsgCode::PortMod,
    MsgCode::MultipartReq,
    MsgCode::MultipartResp,
    MsgCode::BarrierReq,
    MsgCode::BarrierResp,
    MsgCode::QueueGetConfigReq,
    MsgCode::QueueGetConfigResp,
];

const CODES_0X04: [MsgCode; 26] = [
    MsgCode::Hello,
    MsgCode::Error,
    MsgCode::EchoReq,
    MsgCode::EchoResp,
    MsgCode::Experimenter,
    MsgCode::FeaturesReq,
    MsgCode::FeaturesResp,
    MsgCode::GetConfigReq,
    MsgCode::GetConfigResp,
    MsgCode::SetConfig,
    MsgCode::PacketIn,
    MsgCode::FlowRemoved,
    MsgCode::PortStatus,
    MsgCode::PacketOut,
    MsgCode::FlowMod,
    MsgCode::GroupMod,
    MsgCode::PortMod,
    MsgCode::TableMod,
    MsgCode::MultipartReq,
    MsgCode::MultipartResp,
    MsgCode::BarrierReq,
    MsgCode::BarrierResp,
    MsgCode::QueueGetConfigReq,
    MsgCode::QueueGetConfigResp,
    MsgCode::RoleReq,
    MsgCode::RoleResp,
];

fn table_for(version: u8) -> Option<&'static [MsgCode]> {
    match version {
        OPENFLOW_0_01_VERSION => Some(&CODES_0X01),
        OPENFLOW_0_04_VERSION => Some(&CODES_0X04),
        _ => None,
    }
}

impl MsgCode {
    /// Map a wire type code of the given protocol version to a `MsgCode`.
    pub fn from_wire(version: u8, code: u8) -> Option<MsgCode> {
        table_for(version).and_then(|t| t.get(code as usize).cloned())
    }

    /// Map a `MsgCode` to its wire type code in the given protocol version.
    /// `None` when the message type does not exist in that version.
    pub fn to_wire(self, version: u8) -> Option<u8> {
        table_for(version).and_then(|t| t.iter().position(|c| *c == self).map(|p| p as u8))
    }

    pub fn direction(self) -> Direction {
        match self {
            MsgCode::Hello
            | MsgCode::Error
            | MsgCode::EchoReq
            | MsgCode::EchoResp
            | MsgCode::Experimenter => Direction::Symmetric,
            MsgCode::FeaturesResp
            | MsgCode::GetConfigResp
            | MsgCode::PacketIn
            | MsgCode::FlowRemoved
            | MsgCode::PortStatus
            | MsgCode::MultipartResp
            | MsgCode::BarrierResp
            | MsgCode::QueueGetConfigResp
            | MsgCode::RoleResp => Direction::SwitchToController,
            MsgCode::FeaturesReq
            | MsgCode::GetConfigReq
            | MsgCode::SetConfig
            | MsgCode::PacketOut
            | MsgCode::FlowMod
            | MsgCode::GroupMod
            | MsgCode::PortMod
            | MsgCode::TableMod
            | MsgCode::MultipartReq
            | MsgCode::BarrierReq
            | MsgCode::QueueGetConfigReq
            | MsgCode::RoleReq => Direction::ControllerToSwitch,
        }
    }

    /// Answers to a controller request. Asynchronous notifications are not replies even
    /// when their xid happens to match an outstanding request.
    pub fn is_reply(self) -> bool {
        match self {
            MsgCode::Error
            | MsgCode::EchoResp
            | MsgCode::FeaturesResp
            | MsgCode::GetConfigResp
            | MsgCode::MultipartResp
            | MsgCode::BarrierResp
            | MsgCode::QueueGetConfigResp
            | MsgCode::RoleResp => true,
            _ => false,
        }
    }

    /// Messages that change forwarding or configuration state on the datapath.
    /// Only the master controller may send these.
    pub fn is_state_mutating(self) -> bool {
        match self {
            MsgCode::SetConfig
            | MsgCode::PacketOut
            | MsgCode::FlowMod
            | MsgCode::GroupMod
            | MsgCode::PortMod
            | MsgCode::TableMod => true,
            _ => false,
        }
    }
}

impl Display for MsgCode {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        let text = match self {
            MsgCode::Hello => "Hello",
            MsgCode::Error => "Error",
            MsgCode::EchoReq => "EchoReq",
            MsgCode::EchoResp => "EchoResp",
            MsgCode::Experimenter => "Experimenter",
            MsgCode::FeaturesReq => "FeaturesReq",
            MsgCode::FeaturesResp => "FeaturesResp",
            MsgCode::GetConfigReq => "GetConfigReq",
            MsgCode::GetConfigResp => "GetConfigResp",
            MsgCode::SetConfig => "SetConfig",
            MsgCode::PacketIn => "PacketIn",
            MsgCode::FlowRemoved => "FlowRemoved",
            MsgCode::PortStatus => "PortStatus",
            MsgCode::PacketOut => "PacketOut",
            MsgCode::FlowMod => "FlowMod",
            MsgCode::GroupMod => "GroupMod",
            MsgCode::PortMod => "PortMod",
            MsgCode::TableMod => "TableMod",
            MsgCode::MultipartReq => "MultipartReq",
            MsgCode::MultipartResp => "MultipartResp",
            MsgCode::BarrierReq => "BarrierReq",
            MsgCode::BarrierResp => "BarrierResp",
            MsgCode::QueueGetConfigReq => "QueueGetConfigReq",
            MsgCode::QueueGetConfigResp => "QueueGetConfigResp",
            MsgCode::RoleReq => "RoleReq",
            MsgCode::RoleResp => "RoleResp",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_differ_per_version() {
        assert_eq!(MsgCode::PortMod.to_wire(OPENFLOW_0_01_VERSION), Some(15));
        assert_eq!(MsgCode::PortMod.to_wire(OPENFLOW_0_04_VERSION), Some(16));
        assert_eq!(MsgCode::BarrierReq.to_wire(OPENFLOW_0_01_VERSION), Some(18));
        assert_eq!(MsgCode::BarrierReq.to_wire(OPENFLOW_0_04_VERSION), Some(20));
        assert_eq!(MsgCode::GroupMod.to_wire(OPENFLOW_0_01_VERSION), None);

        assert_eq!(MsgCode::from_wire(OPENFLOW_0_01_VERSION, 17), Some(MsgCode::MultipartResp));
        assert_eq!(MsgCode::from_wire(OPENFLOW_0_04_VERSION, 19), Some(MsgCode::MultipartResp));
        assert_eq!(MsgCode::from_wire(OPENFLOW_0_04_VERSION, 200), None);
        assert_eq!(MsgCode::from_wire(3, 0), None);
    }

    #[test]
    fn test_every_code_maps_back() {
        for (i, code) in CODES_0X04.iter().enumerate() {
            assert_eq!(code.to_wire(OPENFLOW_0_04_VERSION), Some(i as u8));
        }
    }

    #[test]
    fn test_direction() {
        assert_eq!(MsgCode::PacketIn.direction(), Direction::SwitchToController);
        assert_eq!(MsgCode::FlowMod.direction(), Direction::ControllerToSwitch);
        assert_eq!(MsgCode::EchoReq.direction(), Direction::Symmetric);
        assert!(MsgCode::FlowMod.is_state_mutating());
        assert!(!MsgCode::MultipartReq.is_state_mutating());
    }
}
