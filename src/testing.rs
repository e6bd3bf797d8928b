//! In-process test doubles: a scripted datapath speaking the wire protocol over an in-memory
//! stream, and a listener that records datapath events.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use crate::datapath::DatapathId;
use crate::dispatch::{DatapathEvent, DatapathEventKind, DatapathListener};
use crate::message::{
    DeviceDescriptor, ErrorMsg, Hello, Message, MultipartReply, MultipartReplyBody, MultipartType, Port,
    SwitchFeatures, MULTIPART_MORE, OFPET_BAD_REQUEST,
};
use crate::ofp_controller::Controller;
use crate::ofp_device::OfpMessageReader;
use crate::ofp_header::{OfpHeader, Xid, OPENFLOW_0_04_VERSION};
use crate::ofp_message::WireCodec;
use crate::ofp_serialization::OfpCodec;
use crate::openflow::MsgCode;

const DUPLEX_BUFFER: usize = 256 * 1024;

/// What a switch test double can do.
pub trait Switch {
    /// Open the session by sending our hello.
    fn activate(&mut self) -> BoxFuture<'_, Result<(), failure::Error>>;

    fn send(&mut self, xid: Xid, msg: Message) -> BoxFuture<'_, Result<(), failure::Error>>;

    /// Next message from the controller, `None` once it closed the stream.
    fn receive(&mut self) -> BoxFuture<'_, Result<Option<(OfpHeader, Message)>, failure::Error>>;

    /// Drop the connection.
    fn deactivate(&mut self) -> BoxFuture<'_, ()>;
}

/// Identity and capabilities a mock switch reports.
#[derive(Debug, Clone)]
pub struct SwitchProfile {
    pub dpid: DatapathId,
    pub version: u8,
    /// Versions listed in the hello bitmap. Empty sends a plain hello.
    pub hello_versions: Vec<u8>,
    pub auxiliary_id: u8,
    pub ports: Vec<Port>,
    pub descriptor: DeviceDescriptor,
}

impl SwitchProfile {
    pub fn new(dpid: u64, version: u8) -> SwitchProfile {
        SwitchProfile {
            dpid: DatapathId(dpid),
            version,
            hello_versions: if version >= OPENFLOW_0_04_VERSION { vec![1, version] } else { vec![] },
            auxiliary_id: 0,
            ports: vec![Port::new(1, "eth1"), Port::new(2, "eth2")],
            descriptor: DeviceDescriptor {
                manufacturer: "Mock Networks".to_string(),
                hardware: "MS-1".to_string(),
                software: "1.0".to_string(),
                serial_number: format!("{:016x}", dpid),
                description: "mock switch".to_string(),
            },
        }
    }

    pub fn with_auxiliary_id(mut self, aux_id: u8) -> SwitchProfile {
        self.auxiliary_id = aux_id;
        self
    }

    pub fn with_hello_versions(mut self, versions: &[u8]) -> SwitchProfile {
        self.hello_versions = versions.to_vec();
        self
    }

    pub fn features(&self) -> SwitchFeatures {
        SwitchFeatures {
            datapath_id: self.dpid.0,
            num_buffers: 256,
            num_tables: 8,
            auxiliary_id: self.auxiliary_id,
            capabilities: 0,
            actions: 0,
            ports: if self.version < OPENFLOW_0_04_VERSION {
                self.ports.clone()
            } else {
                vec![]
            },
        }
    }
}

/// How a mock switch answers controller messages.
pub trait SwitchBehavior: Send {
    fn respond(&mut self, profile: &SwitchProfile, xid: Xid, msg: &Message) -> Vec<(Xid, Message)>;
}

/// A well-behaved switch, with knobs for the usual misbehaviours.
#[derive(Debug, Clone)]
pub struct CompliantBehavior {
    pub answer_echo: bool,
    pub reject_table_features: bool,
    /// Split port-desc replies into this many fragments.
    pub port_desc_fragments: usize,
}

impl Default for CompliantBehavior {
    fn default() -> CompliantBehavior {
        CompliantBehavior {
            answer_echo: true,
            reject_table_features: false,
            port_desc_fragments: 1,
        }
    }
}

impl CompliantBehavior {
    fn port_desc(&self, profile: &SwitchProfile, xid: Xid) -> Vec<(Xid, Message)> {
        let fragments = self.port_desc_fragments.max(1);
        let chunk = ((profile.ports.len() + fragments - 1) / fragments).max(1);
        let chunks: Vec<&[Port]> = profile.ports.chunks(chunk).collect();
        let last = chunks.len().saturating_sub(1);
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, ports)| {
                let reply = MultipartReply {
                    kind: MultipartType::PortDesc,
                    flags: if i < last { MULTIPART_MORE } else { 0 },
                    body: MultipartReplyBody::PortDesc(ports.to_vec()),
                };
                (xid, Message::MultipartReply(reply))
            })
            .collect()
    }
}

impl SwitchBehavior for CompliantBehavior {
    fn respond(&mut self, profile: &SwitchProfile, xid: Xid, msg: &Message) -> Vec<(Xid, Message)> {
        match msg {
            Message::FeaturesRequest => vec![(xid, Message::FeaturesReply(profile.features()))],
            Message::EchoRequest(data) if self.answer_echo => vec![(xid, Message::EchoReply(data.clone()))],
            Message::BarrierRequest => vec![(xid, Message::BarrierReply)],
            Message::MultipartRequest(req) => match req.kind {
                MultipartType::Desc => vec![(
                    xid,
                    Message::MultipartReply(MultipartReply {
                        kind: MultipartType::Desc,
                        flags: 0,
                        body: MultipartReplyBody::Desc(profile.descriptor.clone()),
                    }),
                )],
                MultipartType::PortDesc => self.port_desc(profile, xid),
                MultipartType::TableFeatures if self.reject_table_features => vec![(
                    xid,
                    Message::Error(ErrorMsg {
                        err_type: OFPET_BAD_REQUEST,
                        code: 1,
                        data: vec![],
                    }),
                )],
                kind => vec![(
                    xid,
                    Message::MultipartReply(MultipartReply {
                        kind,
                        flags: 0,
                        body: MultipartReplyBody::Raw(vec![]),
                    }),
                )],
            },
            _ => vec![],
        }
    }
}

/// A scripted datapath on the far end of an in-memory stream.
pub struct MockSwitch<B> {
    profile: SwitchProfile,
    behavior: B,
    codec: OfpCodec,
    reader: OfpMessageReader<ReadHalf<DuplexStream>>,
    writer: Option<WriteHalf<DuplexStream>>,
    received: Vec<(Xid, Message)>,
    next_xid: Xid,
}

impl<B: SwitchBehavior> MockSwitch<B> {
    /// Hand a fresh stream to `controller` and keep the other end.
    pub fn connect(controller: &Controller, profile: SwitchProfile, behavior: B) -> Result<MockSwitch<B>, failure::Error> {
        let (ours, theirs) = tokio::io::duplex(DUPLEX_BUFFER);
        controller.accept_stream(theirs, format!("mock:{}", profile.dpid))?;
        let (read_half, write_half) = tokio::io::split(ours);
        Ok(MockSwitch {
            profile,
            behavior,
            codec: OfpCodec::new(),
            reader: OfpMessageReader::new(read_half),
            writer: Some(write_half),
            received: Vec::new(),
            next_xid: 0x1000,
        })
    }

    pub fn profile(&self) -> &SwitchProfile {
        &self.profile
    }

    /// Everything received from the controller so far.
    pub fn received(&self) -> &[(Xid, Message)] {
        &self.received
    }

    pub fn received_codes(&self) -> Vec<MsgCode> {
        self.received.iter().map(|(_, m)| m.msg_code()).collect()
    }

    pub fn count_of(&self, code: MsgCode) -> usize {
        self.received.iter().filter(|(_, m)| m.msg_code() == code).count()
    }

    /// Send an unsolicited message with a fresh xid.
    pub async fn notify(&mut self, msg: Message) -> Result<(), failure::Error> {
        self.next_xid += 1;
        let xid = self.next_xid;
        self.send(xid, msg).await
    }

    /// Receive and answer messages until `done` holds for the received log. Returns false
    /// on timeout or when the controller closes the stream.
    pub async fn pump_until<F>(&mut self, timeout: Duration, mut done: F) -> Result<bool, failure::Error>
    where
        F: FnMut(&[(Xid, Message)]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while !done(&self.received) {
            let next = match tokio::time::timeout_at(deadline, self.receive()).await {
                Ok(next) => next?,
                Err(_) => return Ok(false),
            };
            if next.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Pump until `n` messages of type `code` arrived.
    pub async fn pump_until_count(&mut self, code: MsgCode, n: usize, timeout: Duration) -> Result<bool, failure::Error> {
        self.pump_until(timeout, |log| log.iter().filter(|(_, m)| m.msg_code() == code).count() >= n)
            .await
    }

    /// Pump for a while and report whether the controller closed the stream.
    pub async fn wait_closed(&mut self, timeout: Duration) -> Result<bool, failure::Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.receive()).await {
                Ok(Ok(Some(_))) => (),
                Ok(Ok(None)) | Ok(Err(_)) => return Ok(true),
                Err(_) => return Ok(false),
            }
        }
    }

    async fn write_message(&mut self, xid: Xid, msg: &Message) -> Result<(), failure::Error> {
        let bytes = self.codec.encode(self.profile.version, xid, msg)?;
        match self.writer {
            Some(ref mut writer) => writer.write_all(&bytes).await?,
            None => return Err(failure::err_msg("switch is deactivated")),
        }
        Ok(())
    }

    async fn read_and_answer(&mut self) -> Result<Option<(OfpHeader, Message)>, failure::Error> {
        let (header, body) = match self.reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let msg = self.codec.parse(&header, &body)?;
        self.received.push((header.xid(), msg.clone()));
        let replies = self.behavior.respond(&self.profile, header.xid(), &msg);
        for (xid, reply) in replies {
            // the controller may already be gone
            if self.write_message(xid, &reply).await.is_err() {
                break;
            }
        }
        Ok(Some((header, msg)))
    }
}

impl<B: SwitchBehavior> Switch for MockSwitch<B> {
    fn activate(&mut self) -> BoxFuture<'_, Result<(), failure::Error>> {
        async move {
            let hello = Message::Hello(Hello::with_versions(&self.profile.hello_versions));
            self.write_message(0, &hello).await
        }
        .boxed()
    }

    fn send(&mut self, xid: Xid, msg: Message) -> BoxFuture<'_, Result<(), failure::Error>> {
        async move { self.write_message(xid, &msg).await }.boxed()
    }

    fn receive(&mut self) -> BoxFuture<'_, Result<Option<(OfpHeader, Message)>, failure::Error>> {
        self.read_and_answer().boxed()
    }

    fn deactivate(&mut self) -> BoxFuture<'_, ()> {
        async move {
            if let Some(mut writer) = self.writer.take() {
                let _ = writer.shutdown().await;
            }
        }
        .boxed()
    }
}

/// Datapath listener keeping every event it sees.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<DatapathEvent>>,
}

impl EventRecorder {
    pub fn new() -> EventRecorder {
        EventRecorder::default()
    }

    pub fn events(&self) -> Vec<DatapathEvent> {
        self.events.lock().clone()
    }

    /// Event kinds seen for `dpid`, in delivery order.
    pub fn kinds_for(&self, dpid: DatapathId) -> Vec<DatapathEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.dpid == dpid)
            .map(|e| e.kind)
            .collect()
    }

    pub fn count(&self, dpid: DatapathId, kind: DatapathEventKind) -> usize {
        self.kinds_for(dpid).into_iter().filter(|k| *k == kind).count()
    }

    /// Wait until `dpid` has seen `n` events of `kind`.
    pub async fn wait_for_count(&self, dpid: DatapathId, kind: DatapathEventKind, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(dpid, kind) >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_for(&self, dpid: DatapathId, kind: DatapathEventKind, timeout: Duration) -> bool {
        self.wait_for_count(dpid, kind, 1, timeout).await
    }
}

impl DatapathListener for EventRecorder {
    fn on_datapath_event(&self, event: &DatapathEvent) -> Result<(), failure::Error> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
