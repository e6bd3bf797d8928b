use std::sync::Arc;

use crate::datapath::DatapathId;
use crate::error::ControllerError;
use crate::message::Message;
use crate::openflow::{Direction, MsgCode};

/// Source of mastership decisions. The controller only enforces them.
pub trait RoleAdvisor: Send + Sync {
    fn is_master_for(&self, dpid: DatapathId) -> bool;
}

/// Advisor for a standalone controller, master of every datapath.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysMaster;

impl RoleAdvisor for AlwaysMaster {
    fn is_master_for(&self, _dpid: DatapathId) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

/// Which send entry point a message went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    /// Fire and forget.
    Plain,
    /// Correlated with its reply.
    Future,
    /// Correlated with a companion barrier.
    BarrierFuture,
}

/// Write policy applied to every caller-initiated send, before any I/O.
pub struct RoleGate<A: ?Sized> {
    advisor: Arc<A>,
}

impl<A: RoleAdvisor + ?Sized> RoleGate<A> {
    pub fn new(advisor: Arc<A>) -> RoleGate<A> {
        RoleGate { advisor }
    }

    pub fn role_of(&self, dpid: DatapathId) -> Role {
        if self.advisor.is_master_for(dpid) {
            Role::Master
        } else {
            Role::Slave
        }
    }

    pub fn check(&self, dpid: DatapathId, msg: &Message, path: SendPath) -> Result<(), ControllerError> {
        let code = msg.msg_code();
        if code == MsgCode::Hello || code.direction() == Direction::SwitchToController {
            return Err(ControllerError::invalid(format!(
                "{} is not a controller-initiated message",
                code
            )));
        }
        if code == MsgCode::FlowMod && path != SendPath::BarrierFuture {
            return Err(ControllerError::invalid(
                "FlowMod must be sent with a companion barrier",
            ));
        }
        if code.is_state_mutating() && self.role_of(dpid) != Role::Master {
            return Err(ControllerError::invalid(format!(
                "not master for {}, refusing {}",
                dpid, code
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FlowMod, Match, MultipartRequest, MultipartType, PacketIn, SwitchConfig};

    struct Never;

    impl RoleAdvisor for Never {
        fn is_master_for(&self, _dpid: DatapathId) -> bool {
            false
        }
    }

    const DPID: DatapathId = DatapathId(1);

    fn packet_in() -> Message {
        Message::PacketIn(PacketIn {
            buffer_id: None,
            total_len: 0,
            in_port: 1,
            reason: 0,
            table_id: 0,
            cookie: 0,
            pkt_match: Match::All,
            data: vec![],
        })
    }

    #[test]
    fn test_switch_originated_rejected() {
        let gate = RoleGate::new(Arc::new(AlwaysMaster));
        let err = gate.check(DPID, &packet_in(), SendPath::Plain).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(gate.check(DPID, &Message::BarrierReply, SendPath::Future).is_err());
    }

    #[test]
    fn test_flow_mod_needs_barrier_path() {
        let gate = RoleGate::new(Arc::new(AlwaysMaster));
        let fm = Message::FlowMod(FlowMod::delete_all());
        assert!(gate.check(DPID, &fm, SendPath::Plain).is_err());
        assert!(gate.check(DPID, &fm, SendPath::Future).is_err());
        assert!(gate.check(DPID, &fm, SendPath::BarrierFuture).is_ok());
    }

    #[test]
    fn test_slave_may_only_read() {
        let gate = RoleGate::new(Arc::new(Never));
        assert_eq!(gate.role_of(DPID), Role::Slave);
        let config = Message::SetConfig(SwitchConfig::default());
        assert!(gate.check(DPID, &config, SendPath::Plain).unwrap_err().is_invalid_argument());
        let fm = Message::FlowMod(FlowMod::delete_all());
        assert!(gate.check(DPID, &fm, SendPath::BarrierFuture).is_err());

        let stats = Message::MultipartRequest(MultipartRequest::new(MultipartType::Desc));
        assert!(gate.check(DPID, &stats, SendPath::Future).is_ok());
        assert!(gate.check(DPID, &Message::EchoRequest(vec![]), SendPath::Plain).is_ok());
    }
}
