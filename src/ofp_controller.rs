use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::connection_manager::{ControllerCore, OutboundMessage};
use crate::datapath::{DatapathId, DatapathInfo};
use crate::dispatch::{DatapathListener, Interest, ListenerId, MessageListener, PacketSequencer};
use crate::error::ControllerError;
use crate::message::{Message, PortMod};
use crate::ofp_message::WireCodec;
use crate::ofp_serialization::OfpCodec;
use crate::pending::{MessageFuture, Outcome};
use crate::post_handshake::{ContributorId, DescriptorDeviceTypeResolver, DeviceTypeResolver, InitialFlowContributor};
use crate::role::{Role, RoleAdvisor};
use crate::session::serve_connection;
use crate::stats::StatsSnapshot;

/// What flow and statistics applications use to talk to datapaths.
pub trait ControllerService: Send + Sync {
    /// Fire and forget on the main connection.
    fn send(&self, dpid: DatapathId, msg: Message) -> Result<(), ControllerError>;

    /// Fire and forget on auxiliary connection `aux_id`, or the main one when it is gone.
    fn send_aux(&self, dpid: DatapathId, aux_id: u8, msg: Message) -> Result<(), ControllerError>;

    /// Send a request and get a future resolved by its reply.
    fn send_future(&self, dpid: DatapathId, request: OutboundMessage) -> Result<MessageFuture, ControllerError>;

    /// Send a write followed by `barrier`; the future is resolved by the barrier reply.
    fn send_future_with_barrier(
        &self,
        dpid: DatapathId,
        request: OutboundMessage,
        barrier: OutboundMessage,
    ) -> Result<MessageFuture, ControllerError>;

    fn add_message_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        interest: Interest,
        priority: i32,
    ) -> Result<ListenerId, ControllerError>;

    fn add_datapath_listener(&self, listener: Arc<dyn DatapathListener>, priority: i32) -> ListenerId;

    fn register_sequencer(&self, sequencer: Arc<dyn PacketSequencer>) -> Result<(), ControllerError>;

    fn datapath_info(&self, dpid: DatapathId) -> Result<DatapathInfo, ControllerError>;

    /// Every registered datapath, ordered by id.
    fn all_datapath_info(&self) -> Vec<DatapathInfo>;
}

/// The controller: accepts datapath connections and serves `ControllerService`.
pub struct Controller {
    core: Arc<ControllerCore>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(config: ControllerConfig, advisor: Arc<dyn RoleAdvisor>) -> Controller {
        Controller::with_collaborators(config, advisor, Arc::new(OfpCodec::new()), Arc::new(DescriptorDeviceTypeResolver))
    }

    pub fn with_collaborators(
        config: ControllerConfig,
        advisor: Arc<dyn RoleAdvisor>,
        codec: Arc<dyn WireCodec>,
        resolver: Arc<dyn DeviceTypeResolver>,
    ) -> Controller {
        Controller {
            core: ControllerCore::new(config, advisor, codec, resolver),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        self.core.config()
    }

    /// Start the idle and age-out sweepers. Must be called inside a tokio runtime; `listen`
    /// calls it.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let idle_core = self.core.clone();
        let idle_interval = self.core.config().idle_check_interval;
        let idle = spawn_periodic(self.core.shutdown_token(), idle_interval, move || idle_core.check_idle(Instant::now()));

        let prune_core = self.core.clone();
        let prune_interval = self.core.config().pending_sweep_interval;
        let prune = spawn_periodic(self.core.shutdown_token(), prune_interval, move || {
            let evicted = prune_core.prune_pending(Instant::now());
            if evicted > 0 {
                debug!("Aged out {} pending requests", evicted);
            }
        });
        self.tasks.lock().extend(vec![idle, prune]);
    }

    /// Bind every configured address and accept datapath connections on them. Returns the
    /// bound addresses.
    pub async fn listen(&self) -> Result<Vec<SocketAddr>, ControllerError> {
        if self.core.shutdown_token().is_cancelled() {
            return Err(ControllerError::NotListening);
        }
        self.start();
        let mut bound = Vec::new();
        for addr in self.core.config().listen_addresses.clone() {
            let listener = TcpListener::bind(addr).await?;
            let local = listener.local_addr()?;
            info!("Listening for datapaths on {}", local);
            bound.push(local);
            let task = tokio::spawn(accept_loop(self.core.clone(), listener));
            self.tasks.lock().push(task);
        }
        Ok(bound)
    }

    /// Serve an already established stream, e.g. an in-process test transport.
    pub fn accept_stream<S>(&self, stream: S, remote: String) -> Result<(), ControllerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.core.shutdown_token().is_cancelled() {
            return Err(ControllerError::NotListening);
        }
        self.start();
        tokio::spawn(serve_connection(self.core.clone(), stream, remote));
        Ok(())
    }

    pub fn shutdown(&self) {
        info!("Controller shutting down");
        self.core.shutdown();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        self.core.dispatcher().remove_message_listener(id)
    }

    pub fn remove_datapath_listener(&self, id: ListenerId) -> bool {
        self.core.dispatcher().remove_datapath_listener(id)
    }

    pub fn unregister_sequencer(&self) -> bool {
        self.core.dispatcher().unregister_sequencer()
    }

    pub fn add_initial_flow_contributor(&self, contributor: Arc<dyn InitialFlowContributor>) -> ContributorId {
        self.core.pipeline().add_contributor(contributor)
    }

    pub fn remove_initial_flow_contributor(&self, id: ContributorId) -> bool {
        self.core.pipeline().remove_contributor(id)
    }

    /// Several writes followed by one barrier.
    pub fn send_batch_future(&self, dpid: DatapathId, messages: Vec<Message>) -> Result<MessageFuture, ControllerError> {
        self.core.send_batch_future(dpid, messages)
    }

    /// Send a request and block the calling thread until it resolves. Never call this from
    /// the runtime's threads.
    pub fn send_and_wait(&self, dpid: DatapathId, request: OutboundMessage, timeout: Duration) -> Result<Outcome, ControllerError> {
        let future = self.core.send_future(dpid, request)?;
        future.wait_timeout(timeout).ok_or(ControllerError::Timeout)
    }

    /// Administratively bring a port up or down.
    pub fn enable_port(&self, dpid: DatapathId, port_no: u32, enable: bool) -> Result<MessageFuture, ControllerError> {
        let dp = self.core.datapath(dpid)?;
        let port = dp
            .ports()
            .get(port_no)
            .ok_or(ControllerError::PortNotFound { dpid, port: port_no })?;
        let port_mod = Message::PortMod(PortMod::set_enabled(&port, enable));
        self.core.send_future_with_barrier(dpid, port_mod.into(), None)
    }

    pub fn version_of(&self, dpid: DatapathId) -> Result<u8, ControllerError> {
        Ok(self.core.datapath(dpid)?.version())
    }

    pub fn role_of(&self, dpid: DatapathId) -> Role {
        self.core.role_of(dpid)
    }

    pub fn is_hybrid_mode(&self) -> bool {
        self.core.config().hybrid_mode
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats().snapshot()
    }

    pub fn reset_stats(&self) {
        self.core.stats().reset()
    }

    pub fn connection_count(&self) -> usize {
        self.core.connection_count()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if !self.core.shutdown_token().is_cancelled() {
            self.shutdown();
        }
    }
}

impl ControllerService for Controller {
    fn send(&self, dpid: DatapathId, msg: Message) -> Result<(), ControllerError> {
        self.core.send(dpid, 0, &msg)
    }

    fn send_aux(&self, dpid: DatapathId, aux_id: u8, msg: Message) -> Result<(), ControllerError> {
        self.core.send(dpid, aux_id, &msg)
    }

    fn send_future(&self, dpid: DatapathId, request: OutboundMessage) -> Result<MessageFuture, ControllerError> {
        self.core.send_future(dpid, request)
    }

    fn send_future_with_barrier(
        &self,
        dpid: DatapathId,
        request: OutboundMessage,
        barrier: OutboundMessage,
    ) -> Result<MessageFuture, ControllerError> {
        if barrier.message != Message::BarrierRequest {
            return Err(ControllerError::invalid(format!(
                "companion must be a barrier request, got {}",
                barrier.message
            )));
        }
        if barrier.xid.is_some() && barrier.xid == request.xid {
            return Err(ControllerError::invalid("barrier needs its own transaction id"));
        }
        self.core.send_future_with_barrier(dpid, request, barrier.xid)
    }

    fn add_message_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        interest: Interest,
        priority: i32,
    ) -> Result<ListenerId, ControllerError> {
        self.core.dispatcher().add_message_listener(listener, interest, priority)
    }

    fn add_datapath_listener(&self, listener: Arc<dyn DatapathListener>, priority: i32) -> ListenerId {
        self.core.dispatcher().add_datapath_listener(listener, priority)
    }

    fn register_sequencer(&self, sequencer: Arc<dyn PacketSequencer>) -> Result<(), ControllerError> {
        self.core.dispatcher().register_sequencer(sequencer)
    }

    fn datapath_info(&self, dpid: DatapathId) -> Result<DatapathInfo, ControllerError> {
        Ok(self.core.datapath(dpid)?.info())
    }

    fn all_datapath_info(&self) -> Vec<DatapathInfo> {
        self.core.all_datapath_info()
    }
}

async fn accept_loop(core: Arc<ControllerCore>, listener: TcpListener) {
    let shutdown = core.shutdown_token();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((socket, addr)) => {
                if let Err(e) = socket.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                }
                tokio::spawn(serve_connection(core.clone(), socket, addr.to_string()));
            }
            Err(e) => warn!("Accept error: {}", e),
        }
    }
}

fn spawn_periodic<F>(shutdown: CancellationToken, period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => tick(),
            }
        }
    })
}
