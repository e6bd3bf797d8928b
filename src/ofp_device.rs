//! One transport connection to a datapath: framing, the writer task and liveness bookkeeping.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use futures::channel::mpsc::{self, Receiver, Sender};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::datapath::DatapathId;
use crate::error::ControllerError;
use crate::handshake::HandshakeState;
use crate::message::Message;
use crate::ofp_header::{OfpHeader, Xid, OFP_HEADER_LENGTH};
use crate::ofp_message::WireCodec;

#[derive(Debug, Fail)]
pub enum FramingError {
    #[fail(display = "IO Error: {}", error)]
    Io { error: io::Error },
    #[fail(display = "Stream ended inside a message: {} of {} bytes", have, expected)]
    Truncated { have: usize, expected: usize },
    #[fail(display = "Header length {} is shorter than the header itself", length)]
    BadLength { length: usize },
}

impl From<io::Error> for FramingError {
    fn from(error: io::Error) -> Self {
        FramingError::Io { error }
    }
}

/// Splits a byte stream into OpenFlow frames.
#[derive(Debug)]
pub struct OfpMessageReader<R> {
    socket: R,
    rd: BytesMut,
}

impl<R: AsyncRead + Unpin> OfpMessageReader<R> {
    pub fn new(socket: R) -> Self {
        OfpMessageReader {
            socket,
            rd: BytesMut::with_capacity(4096),
        }
    }

    fn have_header(&self) -> bool {
        self.rd.len() >= OfpHeader::size()
    }

    fn get_header_length(&self) -> usize {
        ((self.rd[2] as usize) << 8) + self.rd[3] as usize
    }

    fn have_full_message(&self) -> bool {
        self.have_header() && self.rd.len() >= self.get_header_length()
    }

    /// Next frame, `Ok(None)` on a clean end of stream between frames.
    pub async fn read_frame(&mut self) -> Result<Option<(OfpHeader, BytesMut)>, FramingError> {
        loop {
            if self.have_header() {
                let length = self.get_header_length();
                if length < OFP_HEADER_LENGTH {
                    return Err(FramingError::BadLength { length });
                }
                if self.have_full_message() {
                    let header_data = self.rd.split_to(OFP_HEADER_LENGTH);
                    let body = self.rd.split_to(length - OFP_HEADER_LENGTH);
                    let header = OfpHeader::parse(&header_data).map_err(|_| FramingError::BadLength { length })?;
                    return Ok(Some((header, body)));
                }
                self.rd.reserve(length - self.rd.len());
            }

            let n = self.socket.read_buf(&mut self.rd).await?;
            if n == 0 {
                if self.rd.is_empty() {
                    return Ok(None);
                }
                let expected = if self.have_header() {
                    self.get_header_length()
                } else {
                    OFP_HEADER_LENGTH
                };
                return Err(FramingError::Truncated {
                    have: self.rd.len(),
                    expected,
                });
            }
        }
    }
}

/// Drains encoded frames into the socket until the channel closes or the token is cancelled.
/// Frames queued before cancellation are still flushed.
pub async fn run_writer<W: AsyncWrite + Unpin>(
    mut socket: W,
    mut rx: Receiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.next() => frame,
            _ = shutdown.cancelled() => {
                while let Ok(Some(bytes)) = rx.try_next() {
                    if socket.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        match frame {
            Some(bytes) => {
                if let Err(e) = socket.write_all(&bytes).await {
                    match e.kind() {
                        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                            debug!("Peer went away while writing: {}", e)
                        }
                        _ => warn!("Error writing to socket: {}", e),
                    }
                    shutdown.cancel();
                    break;
                }
            }
            None => break,
        }
    }
    let _ = socket.shutdown().await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    Alive,
    SendEcho,
    Disconnect,
}

/// Idle/zombie bookkeeping for one connection.
#[derive(Debug, Clone)]
pub struct Liveness {
    last_seen: Instant,
    next_echo: Option<Instant>,
    attempts: u32,
}

impl Liveness {
    pub fn new(now: Instant) -> Liveness {
        Liveness {
            last_seen: now,
            next_echo: None,
            attempts: 0,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
        self.next_echo = None;
        self.attempts = 0;
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn check(&mut self, now: Instant, max_idle: Duration, echo_interval: Duration, max_attempts: u32) -> LivenessAction {
        if now.duration_since(self.last_seen) < max_idle {
            return LivenessAction::Alive;
        }
        if let Some(next) = self.next_echo {
            if now < next {
                return LivenessAction::Alive;
            }
        }
        if self.attempts < max_attempts {
            self.attempts += 1;
            self.next_echo = Some(now + echo_interval);
            LivenessAction::SendEcho
        } else {
            LivenessAction::Disconnect
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A main or auxiliary channel to a datapath.
pub struct Connection {
    id: u64,
    remote: String,
    codec: Arc<dyn WireCodec>,
    version: AtomicU8,
    aux_id: AtomicU8,
    dpid: Mutex<Option<DatapathId>>,
    state: Mutex<HandshakeState>,
    liveness: Mutex<Liveness>,
    writer: Mutex<Sender<Vec<u8>>>,
    shutdown: CancellationToken,
    revoked: AtomicBool,
    frames_sent: AtomicU64,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Connection#{}({}, aux {})", self.id, self.remote, self.aux_id())
    }
}

impl Connection {
    /// Creates the connection handle and the receiving end its writer task drains.
    pub fn new(remote: String, codec: Arc<dyn WireCodec>, writer_capacity: usize) -> (Arc<Connection>, Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(writer_capacity);
        let conn = Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            codec,
            version: AtomicU8::new(0),
            aux_id: AtomicU8::new(0),
            dpid: Mutex::new(None),
            state: Mutex::new(HandshakeState::Connecting),
            liveness: Mutex::new(Liveness::new(Instant::now())),
            writer: Mutex::new(tx),
            shutdown: CancellationToken::new(),
            revoked: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
        };
        (Arc::new(conn), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn version(&self) -> u8 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn set_version(&self, version: u8) {
        self.version.store(version, Ordering::Release)
    }

    pub fn aux_id(&self) -> u8 {
        self.aux_id.load(Ordering::Acquire)
    }

    pub fn is_auxiliary(&self) -> bool {
        self.aux_id() != 0
    }

    pub(crate) fn bind(&self, dpid: DatapathId, aux_id: u8) {
        *self.dpid.lock() = Some(dpid);
        self.aux_id.store(aux_id, Ordering::Release);
    }

    pub fn dpid(&self) -> Option<DatapathId> {
        *self.dpid.lock()
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.lock()
    }

    /// Terminal states stick.
    pub(crate) fn set_state(&self, state: HandshakeState) {
        let mut current = self.state.lock();
        if !current.is_terminal() {
            trace!("{:?}: {:?} -> {:?}", self, *current, state);
            *current = state;
        }
    }

    pub(crate) fn touch(&self) {
        self.liveness.lock().touch(Instant::now());
    }

    pub fn last_seen(&self) -> Instant {
        self.liveness.lock().last_seen()
    }

    pub(crate) fn check_liveness(&self, now: Instant, max_idle: Duration, echo_interval: Duration, max_attempts: u32) -> LivenessAction {
        self.liveness.lock().check(now, max_idle, echo_interval, max_attempts)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Encode `msg` with the negotiated version and queue it for the writer.
    pub fn send(&self, xid: Xid, msg: &Message) -> Result<(), ControllerError> {
        let version = self.version();
        let bytes = self.codec.encode(version, xid, msg)?;
        self.send_raw(bytes)
    }

    pub(crate) fn send_raw(&self, bytes: Vec<u8>) -> Result<(), ControllerError> {
        if self.is_closed() {
            return Err(self.send_failed("connection closed"));
        }
        let mut writer = self.writer.lock();
        writer.try_send(bytes).map_err(|e| {
            if e.is_full() {
                self.send_failed("writer queue full")
            } else {
                self.send_failed("writer gone")
            }
        })?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn send_failed(&self, reason: &str) -> ControllerError {
        ControllerError::SendFailed {
            dpid: self.dpid().unwrap_or_default(),
            reason: format!("{} on {:?}", reason, self),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn close(&self) {
        self.set_state(HandshakeState::Closed);
        self.shutdown.cancel();
    }

    /// Close because another connection took over the datapath.
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
        self.set_state(HandshakeState::Revoked);
        self.shutdown.cancel();
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ofp_serialization::OfpCodec;

    #[tokio::test]
    async fn test_reader_splits_frames() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = OfpMessageReader::new(server);
        // a hello and an echo request with a 2 byte payload, written in odd chunks
        client.write_all(&[4, 0, 0, 8, 0, 0, 0, 1, 4, 2]).await.unwrap();
        client.write_all(&[0, 10, 0, 0, 0, 2, 0xaa, 0xbb]).await.unwrap();
        drop(client);

        let (header, body) = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(header.type_code(), 0);
        assert!(body.is_empty());
        let (header, body) = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(header.xid(), 2);
        assert_eq!(&body[..], &[0xaa, 0xbb]);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_truncated_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = OfpMessageReader::new(server);
        client.write_all(&[4, 0, 0, 16, 0, 0, 0, 1, 1, 2]).await.unwrap();
        drop(client);

        match reader.read_frame().await {
            Err(FramingError::Truncated { have, expected }) => {
                assert_eq!(have, 10);
                assert_eq!(expected, 16);
            }
            other => assert!(false, "unexpected result {:?}", other.map(|f| f.map(|(h, _)| h))),
        }
    }

    #[tokio::test]
    async fn test_reader_bad_length() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = OfpMessageReader::new(server);
        client.write_all(&[4, 0, 0, 4, 0, 0, 0, 1]).await.unwrap();
        assert!(reader.read_frame().await.is_err());
    }

    #[test]
    fn test_liveness_probes_then_disconnects() {
        let start = Instant::now();
        let idle = Duration::from_millis(100);
        let echo = Duration::from_millis(50);
        let mut liveness = Liveness::new(start);

        assert_eq!(liveness.check(start + Duration::from_millis(99), idle, echo, 2), LivenessAction::Alive);
        assert_eq!(liveness.check(start + Duration::from_millis(100), idle, echo, 2), LivenessAction::SendEcho);
        assert_eq!(liveness.check(start + Duration::from_millis(120), idle, echo, 2), LivenessAction::Alive);
        assert_eq!(liveness.check(start + Duration::from_millis(150), idle, echo, 2), LivenessAction::SendEcho);
        assert_eq!(liveness.check(start + Duration::from_millis(200), idle, echo, 2), LivenessAction::Disconnect);

        liveness.touch(start + Duration::from_millis(210));
        assert_eq!(liveness.check(start + Duration::from_millis(250), idle, echo, 2), LivenessAction::Alive);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (conn, mut rx) = Connection::new("test".to_string(), Arc::new(OfpCodec::new()), 4);
        conn.set_version(4);
        conn.send(1, &Message::BarrierRequest).unwrap();
        assert_eq!(rx.next().await.unwrap(), vec![4, 20, 0, 8, 0, 0, 0, 1]);

        conn.close();
        assert_eq!(conn.state(), HandshakeState::Closed);
        assert!(conn.send(2, &Message::BarrierRequest).is_err());
        assert_eq!(conn.frames_sent(), 1);
    }

    #[tokio::test]
    async fn test_writer_stops_on_cancel() {
        let (client, mut server) = tokio::io::duplex(64);
        let (mut tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let task = tokio::spawn(run_writer(client, rx, token.clone()));

        tx.try_send(vec![1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);

        token.cancel();
        task.await.unwrap();
    }
}
