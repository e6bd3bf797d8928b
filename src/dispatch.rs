//! Fan-out of inbound messages and datapath events to registered listeners.
//!
//! Callbacks run on a fixed pool of worker threads, never on the I/O runtime. Events are
//! sharded by datapath id so one datapath's events keep their order.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::executor::block_on_stream;
use parking_lot::{Mutex, RwLock};

use crate::datapath::{DatapathId, DatapathInfo};
use crate::error::ControllerError;
use crate::message::{Message, Port};
use crate::ofp_header::Xid;
use crate::openflow::MsgCode;
use crate::stats::ControllerStats;

/// An inbound message as seen by listeners.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub dpid: DatapathId,
    pub aux_id: u8,
    pub version: u8,
    pub xid: Xid,
    pub message: Message,
    pub received: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatapathEventKind {
    /// Handshake done, datapath visible through the controller.
    Connected,
    /// Post-handshake pipeline done, default flows installed.
    Ready,
    Disconnected,
    /// Torn down because another connection claimed the same id.
    Revoked,
    PortAdded,
    PortChanged,
    PortRemoved,
}

#[derive(Debug, Clone)]
pub struct DatapathEvent {
    pub kind: DatapathEventKind,
    pub dpid: DatapathId,
    /// Snapshot at the time of the event, absent once the datapath is gone.
    pub info: Option<DatapathInfo>,
    pub port: Option<Port>,
}

impl DatapathEvent {
    pub fn new(kind: DatapathEventKind, dpid: DatapathId) -> DatapathEvent {
        DatapathEvent {
            kind,
            dpid,
            info: None,
            port: None,
        }
    }

    pub fn with_info(mut self, info: DatapathInfo) -> DatapathEvent {
        self.info = Some(info);
        self
    }

    pub fn with_port(mut self, port: Port) -> DatapathEvent {
        self.port = Some(port);
        self
    }
}

pub trait MessageListener: Send + Sync {
    fn on_message(&self, event: &MessageEvent) -> Result<(), failure::Error>;
}

pub trait DatapathListener: Send + Sync {
    fn on_datapath_event(&self, event: &DatapathEvent) -> Result<(), failure::Error>;
}

/// The single consumer of packet-in events.
pub trait PacketSequencer: Send + Sync {
    fn on_packet_in(&self, event: &MessageEvent) -> Result<(), failure::Error>;
}

/// Message types a listener wants. Packet-ins are never delivered to message listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    All,
    Only(HashSet<MsgCode>),
}

impl Interest {
    pub fn of(codes: &[MsgCode]) -> Interest {
        Interest::Only(codes.iter().cloned().collect())
    }

    fn matches(&self, code: MsgCode) -> bool {
        match self {
            Interest::All => true,
            Interest::Only(codes) => codes.contains(&code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

struct Registration<L: ?Sized> {
    id: ListenerId,
    priority: i32,
    listener: Arc<L>,
    interest: Interest,
}

impl<L: ?Sized> Clone for Registration<L> {
    fn clone(&self) -> Self {
        Registration {
            id: self.id,
            priority: self.priority,
            listener: self.listener.clone(),
            interest: self.interest.clone(),
        }
    }
}

/// Copy-on-write listener lists; dispatch clones the `Arc`s and never holds the lock during
/// callbacks.
#[derive(Default)]
struct Registry {
    message: Arc<Vec<Registration<dyn MessageListener>>>,
    datapath: Arc<Vec<Registration<dyn DatapathListener>>>,
    sequencer: Option<Arc<dyn PacketSequencer>>,
    next_id: u64,
}

impl Registry {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

/// Insert keeping (priority, registration order); ids grow with registration order.
fn insert_sorted<L: ?Sized>(list: &Arc<Vec<Registration<L>>>, reg: Registration<L>) -> Arc<Vec<Registration<L>>> {
    let mut next: Vec<Registration<L>> = list.iter().cloned().collect();
    let pos = next
        .iter()
        .position(|r| (r.priority, r.id.0) > (reg.priority, reg.id.0))
        .unwrap_or(next.len());
    next.insert(pos, reg);
    Arc::new(next)
}

enum Job {
    Message(Arc<MessageEvent>),
    PacketIn(Arc<MessageEvent>),
    Datapath(Arc<DatapathEvent>),
}

struct Worker {
    tx: UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
}

pub struct EventDispatcher {
    registry: Arc<RwLock<Registry>>,
    workers: Mutex<Vec<Worker>>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    capacity: usize,
    stats: Arc<ControllerStats>,
}

impl EventDispatcher {
    pub fn new(worker_count: usize, capacity: usize, stats: Arc<ControllerStats>) -> EventDispatcher {
        let registry = Arc::new(RwLock::new(Registry::default()));
        let mut workers = Vec::new();
        let mut handles = Vec::new();
        for n in 0..worker_count.max(1) {
            let (tx, rx) = mpsc::unbounded();
            let depth = Arc::new(AtomicUsize::new(0));
            let worker_depth = depth.clone();
            let worker_registry = registry.clone();
            let spawned = thread::Builder::new()
                .name(format!("ofp-listener-{}", n))
                .spawn(move || {
                    for job in block_on_stream(rx) {
                        run_job(&worker_registry, &worker_depth, job);
                    }
                    debug!("Listener worker exiting");
                });
            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    workers.push(Worker { tx, depth });
                }
                Err(e) => error!("Failed to spawn listener worker {}: {}", n, e),
            }
        }
        EventDispatcher {
            registry,
            workers: Mutex::new(workers),
            handles: Mutex::new(handles),
            capacity,
            stats,
        }
    }

    pub fn add_message_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        interest: Interest,
        priority: i32,
    ) -> Result<ListenerId, ControllerError> {
        if let Interest::Only(ref codes) = interest {
            if codes.contains(&MsgCode::PacketIn) {
                return Err(ControllerError::invalid(
                    "packet-in events are reserved for the packet sequencer",
                ));
            }
        }
        let mut registry = self.registry.write();
        let id = registry.next_id();
        registry.message = insert_sorted(
            &registry.message,
            Registration {
                id,
                priority,
                listener,
                interest,
            },
        );
        Ok(id)
    }

    pub fn add_datapath_listener(&self, listener: Arc<dyn DatapathListener>, priority: i32) -> ListenerId {
        let mut registry = self.registry.write();
        let id = registry.next_id();
        registry.datapath = insert_sorted(
            &registry.datapath,
            Registration {
                id,
                priority,
                listener,
                interest: Interest::All,
            },
        );
        id
    }

    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.write();
        let before = registry.message.len();
        let next: Vec<_> = registry.message.iter().filter(|r| r.id != id).cloned().collect();
        registry.message = Arc::new(next);
        registry.message.len() != before
    }

    pub fn remove_datapath_listener(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.write();
        let before = registry.datapath.len();
        let next: Vec<_> = registry.datapath.iter().filter(|r| r.id != id).cloned().collect();
        registry.datapath = Arc::new(next);
        registry.datapath.len() != before
    }

    /// Fails if a sequencer is already installed; the installed one is kept.
    pub fn register_sequencer(&self, sequencer: Arc<dyn PacketSequencer>) -> Result<(), ControllerError> {
        let mut registry = self.registry.write();
        if registry.sequencer.is_some() {
            return Err(ControllerError::SequencerAlreadyRegistered);
        }
        registry.sequencer = Some(sequencer);
        Ok(())
    }

    pub fn unregister_sequencer(&self) -> bool {
        self.registry.write().sequencer.take().is_some()
    }

    /// Queue an inbound message. Packet-ins go to the sequencer only.
    pub fn dispatch_message(&self, event: MessageEvent) {
        let dpid = event.dpid;
        let job = match event.message {
            Message::PacketIn(_) => Job::PacketIn(Arc::new(event)),
            _ => Job::Message(Arc::new(event)),
        };
        self.submit(dpid, job, true);
    }

    /// Queue a connectivity event. These are never dropped.
    pub fn dispatch_datapath_event(&self, event: DatapathEvent) {
        info!("{} {:?}", event.dpid, event.kind);
        self.submit(event.dpid, Job::Datapath(Arc::new(event)), false);
    }

    fn submit(&self, dpid: DatapathId, job: Job, droppable: bool) {
        let workers = self.workers.lock();
        if workers.is_empty() {
            return;
        }
        let mut hasher = DefaultHasher::new();
        dpid.hash(&mut hasher);
        let worker = &workers[(hasher.finish() % workers.len() as u64) as usize];

        let depth = worker.depth.fetch_add(1, Ordering::AcqRel);
        if droppable && depth >= self.capacity {
            worker.depth.fetch_sub(1, Ordering::AcqRel);
            self.stats.record_drop();
            warn!("Listener queue for {} full ({}), dropping event", dpid, depth);
            return;
        }
        if worker.tx.unbounded_send(job).is_err() {
            worker.depth.fetch_sub(1, Ordering::AcqRel);
            debug!("Listener worker gone, event for {} discarded", dpid);
        }
    }

    /// Stop the workers after they drain what is already queued.
    pub fn shutdown(&self) {
        self.workers.lock().clear();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            // a listener calling shutdown from its own worker must not join itself
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.workers.lock().clear();
    }
}

fn run_job(registry: &RwLock<Registry>, depth: &AtomicUsize, job: Job) {
    depth.fetch_sub(1, Ordering::AcqRel);
    match job {
        Job::Message(event) => {
            let listeners = registry.read().message.clone();
            let code = event.message.msg_code();
            for reg in listeners.iter().filter(|r| r.interest.matches(code)) {
                isolate(reg.id, || reg.listener.on_message(&event));
            }
        }
        Job::PacketIn(event) => {
            let sequencer = registry.read().sequencer.clone();
            match sequencer {
                Some(sequencer) => isolate(ListenerId(0), || sequencer.on_packet_in(&event)),
                None => trace!("No sequencer, packet-in from {} ignored", event.dpid),
            }
        }
        Job::Datapath(event) => {
            let listeners = registry.read().datapath.clone();
            for reg in listeners.iter() {
                isolate(reg.id, || reg.listener.on_datapath_event(&event));
            }
        }
    }
}

/// Run one callback, logging its failure or panic without affecting the others.
fn isolate<F>(id: ListenerId, f: F)
where
    F: FnOnce() -> Result<(), failure::Error>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => (),
        Ok(Err(e)) => warn!("Listener {} failed: {}", id, e),
        Err(_) => error!("Listener {} panicked", id),
    }
}
