//! Correlation of outbound requests with the replies, barrier replies and errors they provoke.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::datapath::DatapathId;
use crate::error::ControllerError;
use crate::message::{ErrorMsg, Message, MultipartReply};
use crate::ofp_header::Xid;
use crate::openflow::MsgCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Success,
    SuccessNoReply,
    ProtocolError,
    Exception,
}

/// Final result of a `MessageFuture`.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The reply. Multipart replies are merged into one message.
    Success(Message),
    /// The companion barrier came back and no error referenced the request.
    SuccessNoReply,
    ProtocolError(ErrorMsg),
    Exception(Arc<ControllerError>),
}

impl Outcome {
    pub fn state(&self) -> FutureState {
        match self {
            Outcome::Success(_) => FutureState::Success,
            Outcome::SuccessNoReply => FutureState::SuccessNoReply,
            Outcome::ProtocolError(_) => FutureState::ProtocolError,
            Outcome::Exception(_) => FutureState::Exception,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Outcome::Success(_) | Outcome::SuccessNoReply => true,
            _ => false,
        }
    }
}

struct FutureInner {
    dpid: DatapathId,
    xid: Xid,
    request: MsgCode,
    created: Instant,
    outcome: Mutex<Option<Outcome>>,
    cond: Condvar,
    notify: Notify,
}

/// Handle on an outstanding request. Cloning shares the same result.
///
/// Resolution happens exactly once; later attempts are ignored.
#[derive(Clone)]
pub struct MessageFuture {
    inner: Arc<FutureInner>,
}

impl fmt::Debug for MessageFuture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "MessageFuture({} xid={} {} {:?})",
            self.inner.dpid,
            self.inner.xid,
            self.inner.request,
            self.state()
        )
    }
}

impl MessageFuture {
    pub fn new(dpid: DatapathId, xid: Xid, request: MsgCode) -> MessageFuture {
        MessageFuture {
            inner: Arc::new(FutureInner {
                dpid,
                xid,
                request,
                created: Instant::now(),
                outcome: Mutex::new(None),
                cond: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    pub fn dpid(&self) -> DatapathId {
        self.inner.dpid
    }

    pub fn xid(&self) -> Xid {
        self.inner.xid
    }

    pub fn request_code(&self) -> MsgCode {
        self.inner.request
    }

    pub fn created(&self) -> Instant {
        self.inner.created
    }

    pub fn state(&self) -> FutureState {
        match *self.inner.outcome.lock() {
            Some(ref outcome) => outcome.state(),
            None => FutureState::Pending,
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.outcome.lock().is_some()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.outcome.lock().clone()
    }

    /// Reply payload, when resolved with `Success`.
    pub fn reply(&self) -> Option<Message> {
        match *self.inner.outcome.lock() {
            Some(Outcome::Success(ref msg)) => Some(msg.clone()),
            _ => None,
        }
    }

    /// Returns false when the future was already resolved.
    pub(crate) fn resolve(&self, outcome: Outcome) -> bool {
        {
            let mut slot = self.inner.outcome.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            self.inner.cond.notify_all();
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub(crate) fn fail(&self, error: ControllerError) -> bool {
        self.resolve(Outcome::Exception(Arc::new(error)))
    }

    /// Block the calling thread until resolution or `timeout`. Never call this from the
    /// I/O runtime.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.outcome.lock();
        while slot.is_none() {
            if self.inner.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.clone()
    }

    pub async fn wait(&self) -> Outcome {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    /// Resolved by the reply carrying the same xid.
    Reply,
    /// Resolved by the companion barrier reply.
    Barrier,
}

struct Pending {
    future: MessageFuture,
    kind: PendingKind,
    barrier_xid: Option<Xid>,
    /// Further writes covered by the same barrier (batch sends).
    writes: Vec<Xid>,
    fragments: Option<MultipartReply>,
    generation: u64,
}

#[derive(Default)]
struct TableInner {
    entries: HashMap<Xid, Pending>,
    /// barrier xid -> entry xid
    barriers: HashMap<Xid, Xid>,
    /// extra batch write xid -> entry xid
    writes: HashMap<Xid, Xid>,
    deadlines: BinaryHeap<Reverse<(Instant, u64, Xid)>>,
    generation: u64,
}

impl TableInner {
    fn xid_in_use(&self, xid: Xid) -> bool {
        self.entries.contains_key(&xid) || self.barriers.contains_key(&xid) || self.writes.contains_key(&xid)
    }

    fn owner_of(&self, xid: Xid) -> Option<Xid> {
        if self.entries.contains_key(&xid) {
            Some(xid)
        } else {
            self.barriers
                .get(&xid)
                .or_else(|| self.writes.get(&xid))
                .cloned()
        }
    }

    fn remove(&mut self, key: Xid) -> Option<Pending> {
        let pending = self.entries.remove(&key)?;
        if let Some(barrier) = pending.barrier_xid {
            self.barriers.remove(&barrier);
        }
        for write in &pending.writes {
            self.writes.remove(write);
        }
        Some(pending)
    }
}

/// Per-datapath table of outstanding requests.
///
/// Age-out uses a min-heap of deadlines with lazy deletion: entries resolved earlier leave
/// stale heap items that are skipped by `prune`.
pub struct PendingRequestTable {
    dpid: DatapathId,
    age_out: Duration,
    inner: Mutex<TableInner>,
}

impl PendingRequestTable {
    pub fn new(dpid: DatapathId, age_out: Duration) -> PendingRequestTable {
        PendingRequestTable {
            dpid,
            age_out,
            inner: Mutex::new(TableInner::default()),
        }
    }

    /// Track a request resolved by its own reply.
    pub fn register(&self, future: &MessageFuture) -> Result<(), ControllerError> {
        self.insert(future, PendingKind::Reply, None, Vec::new())
    }

    /// Track a write resolved by the reply to `barrier_xid`.
    pub fn register_with_barrier(&self, future: &MessageFuture, barrier_xid: Xid) -> Result<(), ControllerError> {
        self.insert(future, PendingKind::Barrier, Some(barrier_xid), Vec::new())
    }

    /// Track several writes sharing one barrier. The future is keyed on the first write.
    pub fn register_batch(
        &self,
        future: &MessageFuture,
        other_writes: Vec<Xid>,
        barrier_xid: Xid,
    ) -> Result<(), ControllerError> {
        self.insert(future, PendingKind::Barrier, Some(barrier_xid), other_writes)
    }

    fn insert(
        &self,
        future: &MessageFuture,
        kind: PendingKind,
        barrier_xid: Option<Xid>,
        writes: Vec<Xid>,
    ) -> Result<(), ControllerError> {
        let xid = future.xid();
        let duplicate = {
            let mut table = self.inner.lock();
            let mut claimed = vec![xid];
            claimed.extend(barrier_xid);
            claimed.extend(writes.iter().cloned());
            let mut sorted = claimed.clone();
            sorted.sort();
            sorted.dedup();
            let colliding = claimed.iter().find(|x| table.xid_in_use(**x)).cloned();
            match colliding {
                Some(x) => Some(x),
                None if sorted.len() != claimed.len() => Some(xid),
                None => {
                    table.generation += 1;
                    let generation = table.generation;
                    table
                        .deadlines
                        .push(Reverse((future.created() + self.age_out, generation, xid)));
                    if let Some(barrier) = barrier_xid {
                        table.barriers.insert(barrier, xid);
                    }
                    for write in &writes {
                        table.writes.insert(*write, xid);
                    }
                    table.entries.insert(
                        xid,
                        Pending {
                            future: future.clone(),
                            kind,
                            barrier_xid,
                            writes,
                            fragments: None,
                            generation,
                        },
                    );
                    None
                }
            }
        };

        match duplicate {
            Some(xid) => {
                warn!("Duplicate xid {} on {}, failing the new request", xid, self.dpid);
                future.fail(ControllerError::DuplicateXid { dpid: self.dpid, xid });
                Err(ControllerError::DuplicateXid { dpid: self.dpid, xid })
            }
            None => Ok(()),
        }
    }

    /// Offer an inbound message to the table. Returns true when it matched a pending request.
    pub fn resolve_on_reply(&self, xid: Xid, msg: &Message) -> bool {
        if !msg.msg_code().is_reply() {
            return false;
        }
        let resolved = {
            let mut table = self.inner.lock();
            match msg {
                Message::Error(err) => table
                    .owner_of(xid)
                    .and_then(|key| table.remove(key))
                    .map(|p| (p.future, Outcome::ProtocolError(err.clone()))),
                Message::BarrierReply => {
                    if let Some(key) = table.barriers.get(&xid).cloned() {
                        table.remove(key).map(|p| (p.future, Outcome::SuccessNoReply))
                    } else {
                        Self::take_reply(&mut table, xid, msg)
                    }
                }
                Message::MultipartReply(rep) if rep.has_more() => {
                    match table.entries.get_mut(&xid) {
                        Some(pending) if pending.kind == PendingKind::Reply => {
                            let merged = match pending.fragments.take() {
                                Some(acc) => acc.merge(rep.clone()),
                                None => rep.clone(),
                            };
                            pending.fragments = Some(merged);
                            return true;
                        }
                        _ => None,
                    }
                }
                _ => Self::take_reply(&mut table, xid, msg),
            }
        };

        match resolved {
            Some((future, outcome)) => {
                future.resolve(outcome);
                true
            }
            None => false,
        }
    }

    fn take_reply(table: &mut TableInner, xid: Xid, msg: &Message) -> Option<(MessageFuture, Outcome)> {
        match table.entries.get(&xid) {
            Some(pending) if pending.kind == PendingKind::Reply => (),
            _ => return None,
        }
        let mut pending = table.remove(xid)?;
        let reply = match (pending.fragments.take(), msg) {
            (Some(acc), Message::MultipartReply(last)) => Message::MultipartReply(acc.merge(last.clone())),
            _ => msg.clone(),
        };
        Some((pending.future, Outcome::Success(reply)))
    }

    /// Drop a request without resolving it (used when the send itself failed).
    pub fn remove(&self, xid: Xid) -> Option<MessageFuture> {
        self.inner.lock().remove(xid).map(|p| p.future)
    }

    /// Evict entries whose age-out deadline is at or before `now`.
    pub fn prune(&self, now: Instant) -> Vec<MessageFuture> {
        let evicted: Vec<MessageFuture> = {
            let mut table = self.inner.lock();
            let mut evicted = Vec::new();
            loop {
                let (deadline, generation, xid) = match table.deadlines.peek() {
                    Some(Reverse(item)) => *item,
                    None => break,
                };
                if deadline > now {
                    break;
                }
                table.deadlines.pop();
                let live = table
                    .entries
                    .get(&xid)
                    .map(|p| p.generation == generation)
                    .unwrap_or(false);
                if live {
                    if let Some(pending) = table.remove(xid) {
                        evicted.push(pending.future);
                    }
                }
            }
            evicted
        };

        for future in &evicted {
            warn!("Request {} on {} aged out", future.request_code(), self.dpid);
            future.fail(ControllerError::AgedOut {
                dpid: self.dpid,
                xid: future.xid(),
            });
        }
        evicted
    }

    /// Resolve everything still pending as an exception, e.g. on disconnect.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<Pending> = {
            let mut table = self.inner.lock();
            table.barriers.clear();
            table.writes.clear();
            table.deadlines.clear();
            table.entries.drain().map(|(_, p)| p).collect()
        };
        for pending in &drained {
            pending.future.fail(ControllerError::Disconnected { dpid: self.dpid });
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
