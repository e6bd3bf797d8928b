//! Reader side of one connection: drives the handshake, then feeds inbound messages to the
//! pending-request table, the port cache and the listeners.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection_manager::ControllerCore;
use crate::datapath::{Datapath, DatapathId};
use crate::dispatch::{DatapathEvent, DatapathEventKind, MessageEvent};
use crate::error::ControllerError;
use crate::handshake::{negotiate_version, DescriptionKind, ExtendedHandshake, HandshakeState};
use crate::message::{ErrorMsg, Hello, Message, MultipartRequest, PortReason, PortStatus, SwitchConfig, SwitchFeatures};
use crate::ofp_device::{run_writer, Connection, OfpMessageReader};
use crate::ofp_header::{OfpHeader, Xid};
use crate::ofp_message::OfpSerializationError;

/// Why a session stops reading.
#[derive(Debug)]
enum Close {
    NoCommonVersion,
    Protocol(String),
    NoMainConnection(DatapathId),
    Send(ControllerError),
}

impl From<ControllerError> for Close {
    fn from(e: ControllerError) -> Self {
        Close::Send(e)
    }
}

impl From<OfpSerializationError> for Close {
    fn from(e: OfpSerializationError) -> Self {
        Close::Send(e.into())
    }
}

/// Serve one accepted stream until it closes, the peer misbehaves or the controller shuts
/// down.
pub(crate) async fn serve_connection<S>(core: Arc<ControllerCore>, stream: S, remote: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (conn, rx) = Connection::new(remote, core.codec(), core.config().writer_queue_capacity);
    core.track_connection(&conn);
    info!("New connection {:?}", conn);

    let token = conn.shutdown_token();
    let writer = tokio::spawn(run_writer(write_half, rx, token.clone()));
    let controller_shutdown = core.shutdown_token();
    let mut reader = OfpMessageReader::new(read_half);
    let mut session = Session::new(core.clone(), conn.clone());
    conn.set_state(HandshakeState::VersionNegotiating);

    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            _ = controller_shutdown.cancelled() => break,
            frame = reader.read_frame() => frame,
        };
        match frame {
            Ok(Some((header, body))) => {
                if let Err(reason) = session.on_frame(&header, &body) {
                    warn!("Closing {:?}: {:?}", conn, reason);
                    break;
                }
            }
            Ok(None) => {
                debug!("{:?} closed by peer", conn);
                break;
            }
            Err(e) => {
                warn!("Framing error on {:?}: {}", conn, e);
                break;
            }
        }
    }

    conn.close();
    core.connection_closed(&conn);
    if let Err(e) = writer.await {
        warn!("Writer task for {:?} failed: {}", conn, e);
    }
}

struct Session {
    core: Arc<ControllerCore>,
    conn: Arc<Connection>,
    features_xid: Option<Xid>,
    extended: ExtendedHandshake,
    datapath: Option<Arc<Datapath>>,
}

impl Session {
    fn new(core: Arc<ControllerCore>, conn: Arc<Connection>) -> Session {
        Session {
            core,
            conn,
            features_xid: None,
            extended: ExtendedHandshake::new(),
            datapath: None,
        }
    }

    fn on_frame(&mut self, header: &OfpHeader, body: &[u8]) -> Result<(), Close> {
        self.conn.touch();
        self.core.stats().record_rx();
        let msg = match self.core.codec().parse(header, body) {
            Ok(msg) => msg,
            Err(e) if self.conn.state() == HandshakeState::VersionNegotiating => {
                return self.refuse(&format!("unparsable hello: {}", e));
            }
            Err(e) => {
                warn!("Discarding message from {:?}: {}", self.conn, e);
                self.core.stats().record_parse_error();
                return Ok(());
            }
        };
        trace!("{:?} <- {} xid={}", self.conn, msg, header.xid());

        match self.conn.state() {
            HandshakeState::Connecting | HandshakeState::VersionNegotiating => self.on_hello(header, msg),
            HandshakeState::BasicHandshake => self.on_basic(header.xid(), msg),
            HandshakeState::ExtendedHandshake => self.on_extended(header.xid(), msg),
            HandshakeState::PostHandshake | HandshakeState::Ready => self.on_steady(header.xid(), msg),
            HandshakeState::Closed | HandshakeState::Revoked => Ok(()),
        }
    }

    fn on_hello(&mut self, header: &OfpHeader, msg: Message) -> Result<(), Close> {
        let hello = match msg {
            Message::Hello(hello) => hello,
            other => return self.refuse(&format!("expected hello, got {}", other)),
        };
        let local = &self.core.config().versions;
        let version = match negotiate_version(local, header.version(), &hello.versions) {
            Some(version) => version,
            None => {
                return self.refuse(&format!(
                    "no common version: we speak {:?}, peer v{} {:?}",
                    local,
                    header.version(),
                    hello.versions
                ))
            }
        };
        info!("{:?} negotiated version {}", self.conn, version);

        let ours = self.core.codec().encode(
            self.core.config().highest_version(),
            header.xid(),
            &Message::Hello(Hello::with_versions(local)),
        )?;
        self.conn.send_raw(ours)?;
        self.conn.set_version(version);
        self.conn.set_state(HandshakeState::BasicHandshake);

        let xid = self.core.next_xid();
        self.features_xid = Some(xid);
        self.core.write(&self.conn, xid, &Message::FeaturesRequest)?;
        Ok(())
    }

    /// Tell the peer there is no common version and end the session.
    fn refuse(&self, reason: &str) -> Result<(), Close> {
        warn!("Handshake with {:?} failed: {}", self.conn, reason);
        let error = Message::Error(ErrorMsg::hello_failed(reason));
        match self.core.codec().encode(self.core.config().highest_version(), 0, &error) {
            Ok(bytes) => {
                if let Err(e) = self.conn.send_raw(bytes) {
                    debug!("Could not send hello failure: {}", e);
                }
            }
            Err(e) => debug!("Could not encode hello failure: {}", e),
        }
        Err(Close::NoCommonVersion)
    }

    fn answer_echo(&self, xid: Xid, msg: &Message) -> Result<bool, Close> {
        if let Message::EchoRequest(data) = msg {
            self.core.write(&self.conn, xid, &Message::EchoReply(data.clone()))?;
            return Ok(true);
        }
        Ok(false)
    }

    fn on_basic(&mut self, xid: Xid, msg: Message) -> Result<(), Close> {
        if self.answer_echo(xid, &msg)? {
            return Ok(());
        }
        match msg {
            Message::FeaturesReply(features) if Some(xid) == self.features_xid => self.on_features(features),
            Message::Error(err) => Err(Close::Protocol(format!("features request failed: {}", err))),
            other => {
                debug!("Ignoring {} from {:?} during basic handshake", other, self.conn);
                Ok(())
            }
        }
    }

    fn on_features(&mut self, features: SwitchFeatures) -> Result<(), Close> {
        let dpid = DatapathId(features.datapath_id);
        self.conn.bind(dpid, features.auxiliary_id);

        if features.auxiliary_id != 0 {
            let dp = self
                .core
                .attach_aux(&self.conn)
                .ok_or(Close::NoMainConnection(dpid))?;
            self.datapath = Some(dp);
            self.conn.set_state(HandshakeState::Ready);
            return Ok(());
        }

        let dp = Arc::new(Datapath::new(
            features,
            self.conn.clone(),
            self.core.config().pending_age_out,
        ));
        if !self.core.config().suppress_set_config {
            let config = SwitchConfig {
                flags: 0,
                miss_send_len: self.core.config().miss_send_len,
            };
            self.core.write(&self.conn, self.core.next_xid(), &Message::SetConfig(config))?;
        }

        self.conn.set_state(HandshakeState::ExtendedHandshake);
        for kind in DescriptionKind::required_for(self.conn.version()) {
            let xid = self.core.next_xid();
            self.extended.expect(xid, kind);
            let request = Message::MultipartRequest(MultipartRequest::new(kind.multipart_type()));
            self.core.write(&self.conn, xid, &request)?;
        }
        self.datapath = Some(dp);
        Ok(())
    }

    fn on_extended(&mut self, xid: Xid, msg: Message) -> Result<(), Close> {
        if self.answer_echo(xid, &msg)? {
            return Ok(());
        }
        match msg {
            Message::MultipartReply(ref reply) if self.extended.is_expecting(xid) => {
                self.extended.on_reply(xid, reply);
            }
            Message::Error(ref err) if self.extended.is_expecting(xid) => {
                match self.extended.on_error(xid) {
                    Some(DescriptionKind::TableFeatures) => {
                        debug!("{:?} does not support table features", self.conn)
                    }
                    Some(kind) => warn!("{:?} rejected the {:?} description: {}", self.conn, kind, err),
                    None => (),
                }
            }
            Message::PortStatus(ref status) => {
                if let Some(dp) = &self.datapath {
                    dp.ports().apply(status);
                }
            }
            other => debug!("Ignoring {} from {:?} during extended handshake", other, self.conn),
        }
        if self.extended.is_complete() {
            self.finish_extended();
        }
        Ok(())
    }

    fn finish_extended(&mut self) {
        let dp = match &self.datapath {
            Some(dp) => dp.clone(),
            None => return,
        };
        if let Some(descriptor) = self.extended.descriptor() {
            dp.set_descriptor(descriptor.clone());
        }
        if let Some(ports) = self.extended.take_ports() {
            dp.ports().replace_all(ports);
        }
        if self.extended.no_table_features() {
            dp.set_no_table_features();
        }
        self.conn.set_state(HandshakeState::PostHandshake);
        self.core.register_datapath(&dp);
    }

    fn on_steady(&mut self, xid: Xid, msg: Message) -> Result<(), Close> {
        if self.answer_echo(xid, &msg)? {
            return Ok(());
        }
        let dp = match &self.datapath {
            Some(dp) => dp.clone(),
            None => return Ok(()),
        };
        match &msg {
            Message::PortStatus(status) => self.on_port_status(&dp, status),
            Message::PacketIn(packet_in) => self.core.stats().record_packet_in(packet_in.data.len()),
            _ => (),
        }
        if dp.pending().resolve_on_reply(xid, &msg) {
            return Ok(());
        }
        if let Message::EchoReply(_) = msg {
            return Ok(());
        }
        self.core.dispatcher().dispatch_message(MessageEvent {
            dpid: dp.dpid(),
            aux_id: self.conn.aux_id(),
            version: self.conn.version(),
            xid,
            message: msg,
            received: Instant::now(),
        });
        Ok(())
    }

    fn on_port_status(&self, dp: &Datapath, status: &PortStatus) {
        let previous = dp.ports().apply(status);
        let kind = match (status.reason, previous) {
            (PortReason::Delete, _) => DatapathEventKind::PortRemoved,
            (_, None) => DatapathEventKind::PortAdded,
            (_, Some(_)) => DatapathEventKind::PortChanged,
        };
        debug!("{} port {} {:?}", dp.dpid(), status.desc.port_no, kind);
        if dp.is_announced() {
            self.core
                .dispatcher()
                .dispatch_datapath_event(DatapathEvent::new(kind, dp.dpid()).with_port(status.desc.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_failure_ends_the_session_as_a_send_error() {
        let close: Close = OfpSerializationError::UnsupportedVersion { version: 2 }.into();
        match close {
            Close::Send(ControllerError::Serialization { .. }) => (),
            other => assert!(false, "unexpected close reason {:?}", other),
        }
    }
}
