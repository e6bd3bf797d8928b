//! Registry of connections and datapaths, their teardown, liveness sweeps and the send paths
//! shared by the handshake and the public facade.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::datapath::{Datapath, DatapathId, DatapathInfo};
use crate::dispatch::{DatapathEvent, DatapathEventKind, EventDispatcher};
use crate::error::ControllerError;
use crate::handshake::HandshakeState;
use crate::message::Message;
use crate::ofp_device::{Connection, LivenessAction};
use crate::ofp_header::Xid;
use crate::ofp_message::WireCodec;
use crate::pending::MessageFuture;
use crate::post_handshake::{DeviceTypeResolver, PipelineHost, PostHandshakePipeline};
use crate::role::{Role, RoleAdvisor, RoleGate, SendPath};
use crate::stats::ControllerStats;

/// A message to send, optionally with a caller-chosen transaction id.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub xid: Option<Xid>,
    pub message: Message,
}

impl OutboundMessage {
    pub fn with_xid(xid: Xid, message: Message) -> OutboundMessage {
        OutboundMessage { xid: Some(xid), message }
    }
}

impl From<Message> for OutboundMessage {
    fn from(message: Message) -> Self {
        OutboundMessage { xid: None, message }
    }
}

pub(crate) struct ControllerCore {
    config: ControllerConfig,
    codec: Arc<dyn WireCodec>,
    gate: RoleGate<dyn RoleAdvisor>,
    datapaths: RwLock<HashMap<DatapathId, Arc<Datapath>>>,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    dispatcher: EventDispatcher,
    pipeline: PostHandshakePipeline,
    stats: Arc<ControllerStats>,
    next_xid: AtomicU32,
    shutdown: CancellationToken,
}

impl ControllerCore {
    pub(crate) fn new(
        config: ControllerConfig,
        advisor: Arc<dyn RoleAdvisor>,
        codec: Arc<dyn WireCodec>,
        resolver: Arc<dyn DeviceTypeResolver>,
    ) -> Arc<ControllerCore> {
        let stats = Arc::new(ControllerStats::new());
        Arc::new_cyclic(|weak: &Weak<ControllerCore>| {
            let host: Weak<dyn PipelineHost> = weak.clone();
            ControllerCore {
                dispatcher: EventDispatcher::new(config.worker_count, config.listener_queue_capacity, stats.clone()),
                pipeline: PostHandshakePipeline::new(host, resolver, config.hybrid_mode, config.barrier_timeout),
                gate: RoleGate::new(advisor),
                codec,
                datapaths: RwLock::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
                stats,
                next_xid: AtomicU32::new(1),
                shutdown: CancellationToken::new(),
                config,
            }
        })
    }

    pub(crate) fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub(crate) fn codec(&self) -> Arc<dyn WireCodec> {
        self.codec.clone()
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub(crate) fn pipeline(&self) -> &PostHandshakePipeline {
        &self.pipeline
    }

    pub(crate) fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn role_of(&self, dpid: DatapathId) -> Role {
        self.gate.role_of(dpid)
    }

    /// Controller-wide transaction ids, never 0.
    pub(crate) fn next_xid(&self) -> Xid {
        loop {
            let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
            if xid != 0 {
                return xid;
            }
        }
    }

    pub(crate) fn track_connection(&self, conn: &Arc<Connection>) {
        self.connections.lock().insert(conn.id(), conn.clone());
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub(crate) fn datapath(&self, dpid: DatapathId) -> Result<Arc<Datapath>, ControllerError> {
        self.datapaths
            .read()
            .get(&dpid)
            .cloned()
            .ok_or(ControllerError::NotFound { dpid })
    }

    pub(crate) fn all_datapath_info(&self) -> Vec<DatapathInfo> {
        let mut datapaths: Vec<Arc<Datapath>> = self.datapaths.read().values().cloned().collect();
        datapaths.sort_by_key(|dp| dp.dpid());
        datapaths.iter().map(|dp| dp.info()).collect()
    }

    /// Make `dp` visible, revoking any datapath registered under the same id first.
    pub(crate) fn register_datapath(&self, dp: &Arc<Datapath>) {
        let incumbent = self.datapaths.write().insert(dp.dpid(), dp.clone());
        if let Some(old) = incumbent {
            warn!(
                "{} reconnected from {}, revoking the connection from {}",
                dp.dpid(),
                dp.main().remote(),
                old.main().remote()
            );
            self.teardown(&old, DatapathEventKind::Revoked);
        }
        info!("Datapath {} added (v{}, {})", dp.dpid(), dp.version(), dp.main().remote());
        if dp.mark_announced() {
            self.emit(DatapathEventKind::Connected, dp);
        }
        self.pipeline.submit(dp.clone());
    }

    /// Attach an auxiliary connection to its datapath. None if the datapath is unknown.
    pub(crate) fn attach_aux(&self, conn: &Arc<Connection>) -> Option<Arc<Datapath>> {
        let dp = self.datapaths.read().get(&conn.dpid()?).cloned()?;
        if let Some(previous) = dp.attach_aux(conn.clone()) {
            debug!("{}: aux {} replaced", dp.dpid(), previous.aux_id());
            previous.close();
        }
        info!("{}: auxiliary connection {} from {}", dp.dpid(), conn.aux_id(), conn.remote());
        Some(dp)
    }

    /// Called once the session of `conn` has ended.
    pub(crate) fn connection_closed(&self, conn: &Arc<Connection>) {
        self.connections.lock().remove(&conn.id());
        if conn.is_revoked() {
            return;
        }
        let dpid = match conn.dpid() {
            Some(dpid) => dpid,
            None => {
                debug!("{:?} closed before the handshake finished", conn);
                return;
            }
        };
        if conn.is_auxiliary() {
            if let Some(dp) = self.datapaths.read().get(&dpid) {
                if dp.detach_aux(conn) {
                    info!("{}: auxiliary connection {} closed", dpid, conn.aux_id());
                }
            }
            return;
        }

        let removed = {
            let mut datapaths = self.datapaths.write();
            let is_current = datapaths
                .get(&dpid)
                .map(|dp| Arc::ptr_eq(dp.main(), conn))
                .unwrap_or(false);
            if is_current {
                datapaths.remove(&dpid)
            } else {
                None
            }
        };
        if let Some(dp) = removed {
            self.teardown(&dp, DatapathEventKind::Disconnected);
        }
    }

    /// Tear down a datapath already removed from (or replaced in) the registry.
    fn teardown(&self, dp: &Arc<Datapath>, kind: DatapathEventKind) {
        if kind == DatapathEventKind::Revoked {
            dp.main().revoke();
        } else {
            dp.main().close();
        }
        for aux in dp.take_aux() {
            aux.close();
        }
        dp.cancel_pipeline();
        let failed = dp.pending().fail_all();
        if failed > 0 {
            debug!("{}: {} pending requests failed", dp.dpid(), failed);
        }
        info!("Datapath {} {:?}", dp.dpid(), kind);
        if dp.is_announced() {
            self.emit(kind, dp);
        }
    }

    fn emit(&self, kind: DatapathEventKind, dp: &Datapath) {
        self.dispatcher
            .dispatch_datapath_event(DatapathEvent::new(kind, dp.dpid()).with_info(dp.info()));
    }

    /// One pass of idle detection over every live connection.
    pub(crate) fn check_idle(&self, now: Instant) {
        let connections: Vec<Arc<Connection>> = self.connections.lock().values().cloned().collect();
        for conn in connections {
            let action = conn.check_liveness(
                now,
                self.config.max_idle,
                self.config.echo_interval,
                self.config.max_echo_attempts,
            );
            match action {
                LivenessAction::Alive => (),
                LivenessAction::SendEcho => {
                    if conn.version() == 0 {
                        continue;
                    }
                    trace!("Probing idle {:?}", conn);
                    if let Err(e) = self.write(&conn, self.next_xid(), &Message::EchoRequest(Vec::new())) {
                        debug!("Echo to {:?} failed: {}", conn, e);
                    }
                }
                LivenessAction::Disconnect => {
                    warn!("{:?} stopped answering echo requests, disconnecting", conn);
                    conn.close();
                }
            }
        }
    }

    /// One pass of pending-request age-out over every datapath.
    pub(crate) fn prune_pending(&self, now: Instant) -> usize {
        let datapaths: Vec<Arc<Datapath>> = self.datapaths.read().values().cloned().collect();
        datapaths.iter().map(|dp| dp.pending().prune(now).len()).sum()
    }

    /// Encode and queue one message, counting it.
    pub(crate) fn write(&self, conn: &Connection, xid: Xid, msg: &Message) -> Result<(), ControllerError> {
        conn.send(xid, msg)?;
        self.stats.record_tx();
        if let Message::PacketOut(po) = msg {
            self.stats.record_packet_out(po.data.len());
        }
        Ok(())
    }

    pub(crate) fn send(&self, dpid: DatapathId, aux_id: u8, msg: &Message) -> Result<(), ControllerError> {
        let dp = self.datapath(dpid)?;
        self.gate.check(dpid, msg, SendPath::Plain)?;
        let conn = dp.select_connection(aux_id);
        self.write(&conn, self.next_xid(), msg)
    }

    /// Correlated send. Only policy and lookup failures are returned as errors; anything
    /// after that ends up in the future.
    pub(crate) fn send_future(&self, dpid: DatapathId, request: OutboundMessage) -> Result<MessageFuture, ControllerError> {
        let dp = self.datapath(dpid)?;
        self.gate.check(dpid, &request.message, SendPath::Future)?;
        check_xid(request.xid)?;
        let xid = request.xid.unwrap_or_else(|| self.next_xid());
        let future = MessageFuture::new(dpid, xid, request.message.msg_code());
        if dp.pending().register(&future).is_err() {
            return Ok(future);
        }
        if let Err(e) = self.write(dp.main(), xid, &request.message) {
            dp.pending().remove(xid);
            future.fail(e);
        }
        Ok(future)
    }

    /// Write resolved by a companion barrier on the same connection.
    pub(crate) fn send_future_with_barrier(
        &self,
        dpid: DatapathId,
        request: OutboundMessage,
        barrier_xid: Option<Xid>,
    ) -> Result<MessageFuture, ControllerError> {
        let dp = self.datapath(dpid)?;
        self.gate.check(dpid, &request.message, SendPath::BarrierFuture)?;
        check_xid(request.xid)?;
        check_xid(barrier_xid)?;
        let xid = request.xid.unwrap_or_else(|| self.next_xid());
        let barrier_xid = barrier_xid.unwrap_or_else(|| self.next_xid());
        let future = MessageFuture::new(dpid, xid, request.message.msg_code());
        if dp.pending().register_with_barrier(&future, barrier_xid).is_err() {
            return Ok(future);
        }
        self.write_with_barrier(&dp, &future, &[(xid, request.message)], barrier_xid);
        Ok(future)
    }

    /// Several writes sharing one barrier.
    pub(crate) fn send_batch_future(&self, dpid: DatapathId, messages: Vec<Message>) -> Result<MessageFuture, ControllerError> {
        let dp = self.datapath(dpid)?;
        self.send_batch_on(&dp, messages)
    }

    fn send_batch_on(&self, dp: &Datapath, messages: Vec<Message>) -> Result<MessageFuture, ControllerError> {
        let first = match messages.first() {
            Some(first) => first.msg_code(),
            None => return Err(ControllerError::invalid("empty batch")),
        };
        for msg in &messages {
            self.gate.check(dp.dpid(), msg, SendPath::BarrierFuture)?;
        }
        let writes: Vec<(Xid, Message)> = messages.into_iter().map(|m| (self.next_xid(), m)).collect();
        let barrier_xid = self.next_xid();
        let future = MessageFuture::new(dp.dpid(), writes[0].0, first);
        let others = writes[1..].iter().map(|(xid, _)| *xid).collect();
        if dp.pending().register_batch(&future, others, barrier_xid).is_err() {
            return Ok(future);
        }
        self.write_with_barrier(dp, &future, &writes, barrier_xid);
        Ok(future)
    }

    fn write_with_barrier(&self, dp: &Datapath, future: &MessageFuture, writes: &[(Xid, Message)], barrier_xid: Xid) {
        let conn = dp.main();
        let sent = writes
            .iter()
            .try_for_each(|(xid, msg)| self.write(conn, *xid, msg))
            .and_then(|_| self.write(conn, barrier_xid, &Message::BarrierRequest));
        if let Err(e) = sent {
            dp.pending().remove(future.xid());
            future.fail(e);
        }
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
        let connections: Vec<Arc<Connection>> = self.connections.lock().values().cloned().collect();
        for conn in connections {
            conn.close();
        }
        self.pipeline.shutdown();
        self.dispatcher.shutdown();
    }
}

/// Datapaths send unsolicited messages with xid 0, so it never correlates a reply.
fn check_xid(xid: Option<Xid>) -> Result<(), ControllerError> {
    if xid == Some(0) {
        return Err(ControllerError::invalid("xid 0 is reserved for unsolicited messages"));
    }
    Ok(())
}

impl PipelineHost for ControllerCore {
    fn is_master_for(&self, dpid: DatapathId) -> bool {
        self.gate.role_of(dpid) == Role::Master
    }

    fn send_batch(&self, dp: &Datapath, messages: Vec<Message>) -> Result<MessageFuture, ControllerError> {
        self.send_batch_on(dp, messages)
    }

    fn announce_ready(&self, dp: &Arc<Datapath>) {
        dp.main().set_state(HandshakeState::Ready);
        info!("Datapath {} ready", dp.dpid());
        self.emit(DatapathEventKind::Ready, dp);
    }
}
