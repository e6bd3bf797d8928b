//! Work done for a datapath after its handshake and before it is reported ready: device
//! identification, purge of stale flows and installation of the initial flows.
//!
//! Tasks run one at a time, in submission order, on a dedicated thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::executor::block_on_stream;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::datapath::{Datapath, DatapathId, DatapathInfo};
use crate::error::ControllerError;
use crate::message::{DeviceDescriptor, FlowMod, Message};
use crate::pending::{MessageFuture, Outcome};

/// Supplies the flows a datapath should carry from the start.
pub trait InitialFlowContributor: Send + Sync {
    fn name(&self) -> &str {
        "unnamed"
    }

    fn provide_initial_flows(&self, info: &DatapathInfo, hybrid_mode: bool) -> Vec<FlowMod>;
}

/// Maps a device descriptor to a device type name.
pub trait DeviceTypeResolver: Send + Sync {
    fn resolve(&self, descriptor: Option<&DeviceDescriptor>) -> String;
}

pub const UNKNOWN_DEVICE_TYPE: &str = "unknown";

/// Names the device `<manufacturer>/<hardware>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DescriptorDeviceTypeResolver;

impl DeviceTypeResolver for DescriptorDeviceTypeResolver {
    fn resolve(&self, descriptor: Option<&DeviceDescriptor>) -> String {
        match descriptor {
            Some(d) if !d.manufacturer.is_empty() || !d.hardware.is_empty() => {
                format!("{}/{}", d.manufacturer.trim(), d.hardware.trim())
            }
            _ => UNKNOWN_DEVICE_TYPE.to_string(),
        }
    }
}

/// What the pipeline needs from the controller it runs for.
pub(crate) trait PipelineHost: Send + Sync {
    fn is_master_for(&self, dpid: DatapathId) -> bool;

    /// Send `messages` followed by one barrier, resolved by the barrier reply.
    fn send_batch(&self, dp: &Datapath, messages: Vec<Message>) -> Result<MessageFuture, ControllerError>;

    fn announce_ready(&self, dp: &Arc<Datapath>);
}

/// Handle on a submitted task.
#[derive(Debug, Clone)]
pub struct PostHandshakeHandle {
    token: CancellationToken,
}

impl PostHandshakeHandle {
    /// Invalidate the task. Not yet started: it never runs. In flight: the ready
    /// transition is suppressed.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Invalidated before it started, nothing was sent.
    Aborted,
    /// Invalidated while running, flows sent but no ready transition.
    ReadySuppressed,
    /// The purge or the initial flows were not confirmed; the datapath stays unready.
    FlowsFailed,
}

struct PostHandshakeTask {
    datapath: Arc<Datapath>,
    token: CancellationToken,
}

impl PostHandshakeTask {
    fn is_valid(&self) -> bool {
        !self.token.is_cancelled() && !self.datapath.main().is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContributorId(u64);

type Contributors = Arc<RwLock<Vec<(ContributorId, Arc<dyn InitialFlowContributor>)>>>;

struct PipelineContext {
    host: Weak<dyn PipelineHost>,
    resolver: Arc<dyn DeviceTypeResolver>,
    contributors: Contributors,
    hybrid_mode: bool,
    barrier_timeout: Duration,
}

pub struct PostHandshakePipeline {
    tx: Mutex<Option<UnboundedSender<PostHandshakeTask>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    contributors: Contributors,
    next_contributor: AtomicU64,
}

impl PostHandshakePipeline {
    pub(crate) fn new(
        host: Weak<dyn PipelineHost>,
        resolver: Arc<dyn DeviceTypeResolver>,
        hybrid_mode: bool,
        barrier_timeout: Duration,
    ) -> PostHandshakePipeline {
        let contributors: Contributors = Arc::new(RwLock::new(Vec::new()));
        let context = PipelineContext {
            host,
            resolver,
            contributors: contributors.clone(),
            hybrid_mode,
            barrier_timeout,
        };
        let (tx, rx) = mpsc::unbounded::<PostHandshakeTask>();
        let worker = thread::Builder::new()
            .name("ofp-post-handshake".to_string())
            .spawn(move || {
                for task in block_on_stream(rx) {
                    let dpid = task.datapath.dpid();
                    let outcome = run_task(&context, task);
                    debug!("Post-handshake task for {}: {:?}", dpid, outcome);
                }
            });
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn post-handshake worker: {}", e);
                None
            }
        };
        PostHandshakePipeline {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(worker),
            contributors,
            next_contributor: AtomicU64::new(1),
        }
    }

    /// Queue the task for `datapath`. The handle is also stored on the datapath so a
    /// disconnect cancels it.
    pub(crate) fn submit(&self, datapath: Arc<Datapath>) -> PostHandshakeHandle {
        let token = CancellationToken::new();
        let handle = PostHandshakeHandle { token: token.clone() };
        datapath.set_pipeline(handle.clone());
        let task = PostHandshakeTask { datapath, token };
        match *self.tx.lock() {
            Some(ref tx) => {
                if tx.unbounded_send(task).is_err() {
                    warn!("Post-handshake worker gone, task dropped");
                }
            }
            None => debug!("Pipeline shut down, task dropped"),
        }
        handle
    }

    pub fn add_contributor(&self, contributor: Arc<dyn InitialFlowContributor>) -> ContributorId {
        let id = ContributorId(self.next_contributor.fetch_add(1, Ordering::Relaxed));
        self.contributors.write().push((id, contributor));
        id
    }

    pub fn remove_contributor(&self, id: ContributorId) -> bool {
        let mut contributors = self.contributors.write();
        let before = contributors.len();
        contributors.retain(|(c, _)| *c != id);
        contributors.len() != before
    }

    pub fn contributor_count(&self) -> usize {
        self.contributors.read().len()
    }

    pub(crate) fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run_task(context: &PipelineContext, task: PostHandshakeTask) -> TaskOutcome {
    let dp = &task.datapath;
    if !task.is_valid() {
        info!("{} went away before its post-handshake task ran", dp.dpid());
        return TaskOutcome::Aborted;
    }
    let host = match context.host.upgrade() {
        Some(host) => host,
        None => return TaskOutcome::Aborted,
    };

    let device_type = context.resolver.resolve(dp.descriptor().as_ref());
    debug!("{} is a {}", dp.dpid(), device_type);
    dp.set_device_type(device_type);

    if host.is_master_for(dp.dpid()) {
        if !install_initial_flows(context, host.as_ref(), dp) {
            if task.is_valid() {
                error!("Initial flows failed on {}, it will not be reported ready", dp.dpid());
                return TaskOutcome::FlowsFailed;
            }
            info!("{} went away during its post-handshake task", dp.dpid());
            return TaskOutcome::ReadySuppressed;
        }
    } else {
        info!("Not master for {}, leaving its flow tables alone", dp.dpid());
    }

    if !dp.complete_pipeline(|| host.announce_ready(dp)) {
        info!("{} went away during its post-handshake task", dp.dpid());
        return TaskOutcome::ReadySuppressed;
    }
    TaskOutcome::Completed
}

/// Purge the flow tables, then install the contributed flows. False if either step was not
/// confirmed by its barrier.
fn install_initial_flows(context: &PipelineContext, host: &dyn PipelineHost, dp: &Datapath) -> bool {
    let purge = host.send_batch(dp, vec![Message::FlowMod(FlowMod::delete_all())]);
    if !await_barrier(context, dp, "flow purge", purge) {
        return false;
    }

    let info = dp.info();
    let contributors = context.contributors.read().clone();
    let mut flows = Vec::new();
    for (_, contributor) in contributors.iter() {
        let provided = contributor.provide_initial_flows(&info, context.hybrid_mode);
        let invalid = provided.iter().find_map(|flow| flow.validate(info.version).err());
        match invalid {
            Some(reason) => warn!(
                "Dropping {} initial flows from {} for {}: {}",
                provided.len(),
                contributor.name(),
                dp.dpid(),
                reason
            ),
            None => flows.extend(provided.into_iter().map(Message::FlowMod)),
        }
    }

    if flows.is_empty() {
        debug!("No initial flows for {}", dp.dpid());
        return true;
    }
    let count = flows.len();
    let install = host.send_batch(dp, flows);
    if !await_barrier(context, dp, "initial flows", install) {
        return false;
    }
    info!("Installed {} initial flows on {}", count, dp.dpid());
    true
}

fn await_barrier(
    context: &PipelineContext,
    dp: &Datapath,
    what: &str,
    sent: Result<MessageFuture, ControllerError>,
) -> bool {
    let future = match sent {
        Ok(future) => future,
        Err(e) => {
            warn!("Could not send {} to {}: {}", what, dp.dpid(), e);
            return false;
        }
    };
    match future.wait_timeout(context.barrier_timeout) {
        Some(Outcome::SuccessNoReply) | Some(Outcome::Success(_)) => true,
        Some(Outcome::ProtocolError(err)) => {
            warn!("{} rejected {}: {}", dp.dpid(), what, err);
            false
        }
        Some(Outcome::Exception(e)) => {
            warn!("{} on {} failed: {}", what, dp.dpid(), e);
            false
        }
        None => {
            warn!("Timed out waiting for {} barrier from {}", what, dp.dpid());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ErrorMsg, FlowModCommand, Port, SwitchFeatures, ALL_TABLES, OFPET_BAD_REQUEST};
    use crate::ofp_device::Connection;
    use crate::ofp_serialization::OfpCodec;
    use std::sync::mpsc as std_mpsc;

    struct Host {
        master: bool,
        sent: Mutex<Vec<Vec<Message>>>,
        ready: std_mpsc::Sender<DatapathId>,
        /// Invalidate the running task as soon as it sends.
        cancel_on_send: bool,
        /// Batches from this index on are rejected by the datapath.
        fail_from: Option<usize>,
    }

    impl PipelineHost for Host {
        fn is_master_for(&self, _dpid: DatapathId) -> bool {
            self.master
        }

        fn send_batch(&self, dp: &Datapath, messages: Vec<Message>) -> Result<MessageFuture, ControllerError> {
            let index = {
                let mut sent = self.sent.lock();
                sent.push(messages);
                sent.len() - 1
            };
            if self.cancel_on_send {
                dp.cancel_pipeline();
            }
            let future = MessageFuture::new(dp.dpid(), 1, crate::openflow::MsgCode::FlowMod);
            match self.fail_from {
                Some(from) if index >= from => future.resolve(Outcome::ProtocolError(ErrorMsg {
                    err_type: OFPET_BAD_REQUEST,
                    code: 1,
                    data: vec![],
                })),
                _ => future.resolve(Outcome::SuccessNoReply),
            };
            Ok(future)
        }

        fn announce_ready(&self, dp: &Arc<Datapath>) {
            self.ready.send(dp.dpid()).ok();
        }
    }

    struct Fixed(Vec<FlowMod>);

    impl InitialFlowContributor for Fixed {
        fn provide_initial_flows(&self, _info: &DatapathInfo, _hybrid_mode: bool) -> Vec<FlowMod> {
            self.0.clone()
        }
    }

    fn datapath(dpid: u64) -> Arc<Datapath> {
        let (conn, _rx) = Connection::new("test".to_string(), Arc::new(OfpCodec::new()), 8);
        conn.set_version(4);
        let features = SwitchFeatures {
            datapath_id: dpid,
            num_buffers: 0,
            num_tables: 1,
            auxiliary_id: 0,
            capabilities: 0,
            actions: 0,
            ports: vec![Port::new(1, "p1")],
        };
        Arc::new(Datapath::new(features, conn, Duration::from_secs(10)))
    }

    fn host_with(
        master: bool,
        cancel_on_send: bool,
        fail_from: Option<usize>,
    ) -> (Arc<Host>, std_mpsc::Receiver<DatapathId>) {
        let (tx, rx) = std_mpsc::channel();
        let host = Arc::new(Host {
            master,
            sent: Mutex::new(Vec::new()),
            ready: tx,
            cancel_on_send,
            fail_from,
        });
        (host, rx)
    }

    fn host(master: bool) -> (Arc<Host>, std_mpsc::Receiver<DatapathId>) {
        host_with(master, false, None)
    }

    fn pipeline(host: &Arc<Host>) -> PostHandshakePipeline {
        let weak: Weak<dyn PipelineHost> = Arc::downgrade(&(host.clone() as Arc<dyn PipelineHost>));
        PostHandshakePipeline::new(weak, Arc::new(DescriptorDeviceTypeResolver), false, Duration::from_secs(1))
    }

    fn flow(priority: u16) -> FlowMod {
        FlowMod {
            priority,
            ..FlowMod::new(FlowModCommand::Add)
        }
    }

    #[test]
    fn test_purge_then_contributed_flows() {
        let (host, ready) = host(true);
        let pipeline = pipeline(&host);
        pipeline.add_contributor(Arc::new(Fixed(vec![flow(1), flow(2)])));
        // built for 1.0, the datapath speaks 1.3
        pipeline.add_contributor(Arc::new(Fixed(vec![FlowMod {
            version: Some(1),
            ..flow(3)
        }])));
        let bad_table = FlowMod {
            table_id: ALL_TABLES,
            ..flow(4)
        };
        pipeline.add_contributor(Arc::new(Fixed(vec![flow(5), bad_table])));

        let dp = datapath(9);
        pipeline.submit(dp.clone());
        assert_eq!(ready.recv_timeout(Duration::from_secs(5)).unwrap(), DatapathId(9));
        assert!(dp.is_ready());
        assert_eq!(dp.device_type().unwrap(), UNKNOWN_DEVICE_TYPE);

        let sent = host.sent.lock().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], vec![Message::FlowMod(FlowMod::delete_all())]);
        assert_eq!(sent[1], vec![Message::FlowMod(flow(1)), Message::FlowMod(flow(2))]);
        pipeline.shutdown();
    }

    #[test]
    fn test_cancelled_before_start_sends_nothing() {
        let (host, ready) = host(true);
        let pipeline = pipeline(&host);
        let dp = datapath(3);
        dp.main().close();
        pipeline.submit(dp.clone());
        pipeline.shutdown();

        assert!(host.sent.lock().is_empty());
        assert!(ready.try_recv().is_err());
        assert!(!dp.is_ready());
    }

    #[test]
    fn test_cancel_in_flight_suppresses_ready() {
        let (host, ready) = host_with(true, true, None);
        let pipeline = pipeline(&host);
        pipeline.add_contributor(Arc::new(Fixed(vec![flow(1)])));
        let dp = datapath(4);
        let handle = pipeline.submit(dp.clone());
        pipeline.shutdown();
        assert!(handle.is_cancelled());

        // the in-flight installation still finished
        assert_eq!(host.sent.lock().len(), 2);
        assert!(ready.try_recv().is_err());
        assert!(!dp.is_ready());
    }

    #[test]
    fn test_rejected_purge_stops_before_the_flows() {
        let (host, ready) = host_with(true, false, Some(0));
        let pipeline = pipeline(&host);
        pipeline.add_contributor(Arc::new(Fixed(vec![flow(1)])));
        let dp = datapath(7);
        pipeline.submit(dp.clone());
        pipeline.shutdown();

        assert_eq!(host.sent.lock().len(), 1);
        assert!(ready.try_recv().is_err());
        assert!(!dp.is_ready());
    }

    #[test]
    fn test_rejected_initial_flows_keep_the_datapath_unready() {
        let (host, ready) = host_with(true, false, Some(1));
        let pipeline = pipeline(&host);
        pipeline.add_contributor(Arc::new(Fixed(vec![flow(1), flow(2)])));
        let dp = datapath(8);
        pipeline.submit(dp.clone());
        pipeline.shutdown();

        assert_eq!(host.sent.lock().len(), 2);
        assert!(ready.try_recv().is_err());
        assert!(!dp.is_ready());
        assert!(!dp.info().ready);
    }

    #[test]
    fn test_teardown_is_ordered_after_a_ready_announcement() {
        let dp = datapath(6);
        dp.set_pipeline(PostHandshakeHandle {
            token: CancellationToken::new(),
        });
        let events = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = std_mpsc::channel();
        let worker = {
            let dp = dp.clone();
            let events = events.clone();
            thread::spawn(move || {
                dp.complete_pipeline(|| {
                    started_tx.send(()).ok();
                    thread::sleep(Duration::from_millis(100));
                    events.lock().push("ready");
                })
            })
        };
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        dp.cancel_pipeline();
        events.lock().push("disconnected");
        assert!(worker.join().unwrap());
        assert_eq!(*events.lock(), vec!["ready", "disconnected"]);

        // once torn down nothing is announced any more
        let dp = datapath(10);
        dp.set_pipeline(PostHandshakeHandle {
            token: CancellationToken::new(),
        });
        dp.cancel_pipeline();
        assert!(!dp.complete_pipeline(|| assert!(false, "announced after teardown")));
        assert!(!dp.is_ready());
    }

    #[test]
    fn test_not_master_skips_flows_but_reports_ready() {
        let (host, ready) = host(false);
        let pipeline = pipeline(&host);
        pipeline.add_contributor(Arc::new(Fixed(vec![flow(1)])));
        pipeline.submit(datapath(5));
        assert_eq!(ready.recv_timeout(Duration::from_secs(5)).unwrap(), DatapathId(5));
        assert!(host.sent.lock().is_empty());
        pipeline.shutdown();
    }

    #[test]
    fn test_remove_contributor() {
        let (host, _ready) = host(true);
        let pipeline = pipeline(&host);
        let id = pipeline.add_contributor(Arc::new(Fixed(vec![])));
        assert_eq!(pipeline.contributor_count(), 1);
        assert!(pipeline.remove_contributor(id));
        assert!(!pipeline.remove_contributor(id));
        pipeline.shutdown();
    }

    #[test]
    fn test_device_type_from_descriptor() {
        let resolver = DescriptorDeviceTypeResolver;
        let desc = DeviceDescriptor {
            manufacturer: "Nicira, Inc. ".to_string(),
            hardware: "Open vSwitch".to_string(),
            ..Default::default()
        };
        assert_eq!(resolver.resolve(Some(&desc)), "Nicira, Inc./Open vSwitch");
        assert_eq!(resolver.resolve(None), UNKNOWN_DEVICE_TYPE);
    }
}
