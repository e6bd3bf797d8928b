use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};

use crate::message::{DeviceDescriptor, Port, SwitchFeatures};
use crate::ofp_device::Connection;
use crate::pending::PendingRequestTable;
use crate::port_state::PortStateCache;
use crate::post_handshake::PostHandshakeHandle;

/// 64-bit datapath identifier, displayed as colon separated hex.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct DatapathId(pub u64);

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl From<u64> for DatapathId {
    fn from(v: u64) -> Self {
        DatapathId(v)
    }
}

/// Immutable view of a datapath handed to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct DatapathInfo {
    pub dpid: DatapathId,
    pub version: u8,
    pub remote_address: String,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub capabilities: u32,
    pub descriptor: Option<DeviceDescriptor>,
    pub device_type: Option<String>,
    pub ports: Vec<Port>,
    pub auxiliary_ids: Vec<u8>,
    pub supports_table_features: bool,
    pub ready: bool,
    pub connected_at: SystemTime,
    /// Time since the main connection last heard from the datapath.
    pub idle_for: Duration,
}

/// One registered datapath. Owns its port cache and pending-request table.
pub struct Datapath {
    dpid: DatapathId,
    features: SwitchFeatures,
    main: Arc<Connection>,
    aux: RwLock<BTreeMap<u8, Arc<Connection>>>,
    ports: PortStateCache,
    pending: PendingRequestTable,
    descriptor: RwLock<Option<DeviceDescriptor>>,
    device_type: RwLock<Option<String>>,
    no_table_features: AtomicBool,
    announced: AtomicBool,
    ready: AtomicBool,
    pipeline: Mutex<Option<PostHandshakeHandle>>,
    connected_at: SystemTime,
}

impl fmt::Debug for Datapath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Datapath({} v{} via {:?})", self.dpid, self.version(), self.main)
    }
}

impl Datapath {
    pub fn new(features: SwitchFeatures, main: Arc<Connection>, age_out: Duration) -> Datapath {
        let dpid = DatapathId(features.datapath_id);
        let ports = PortStateCache::new();
        if !features.ports.is_empty() {
            ports.replace_all(features.ports.clone());
        }
        Datapath {
            dpid,
            features,
            main,
            aux: RwLock::new(BTreeMap::new()),
            ports,
            pending: PendingRequestTable::new(dpid, age_out),
            descriptor: RwLock::new(None),
            device_type: RwLock::new(None),
            no_table_features: AtomicBool::new(false),
            announced: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            pipeline: Mutex::new(None),
            connected_at: SystemTime::now(),
        }
    }

    pub fn dpid(&self) -> DatapathId {
        self.dpid
    }

    pub fn version(&self) -> u8 {
        self.main.version()
    }

    pub fn features(&self) -> &SwitchFeatures {
        &self.features
    }

    pub fn main(&self) -> &Arc<Connection> {
        &self.main
    }

    pub fn ports(&self) -> &PortStateCache {
        &self.ports
    }

    pub fn pending(&self) -> &PendingRequestTable {
        &self.pending
    }

    pub(crate) fn attach_aux(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        self.aux.write().insert(conn.aux_id(), conn)
    }

    /// Detach `conn` if it is still the registered channel for its auxiliary id.
    pub(crate) fn detach_aux(&self, conn: &Arc<Connection>) -> bool {
        let mut aux = self.aux.write();
        match aux.get(&conn.aux_id()) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                aux.remove(&conn.aux_id());
                true
            }
            _ => false,
        }
    }

    pub(crate) fn take_aux(&self) -> Vec<Arc<Connection>> {
        let mut aux = self.aux.write();
        let taken = aux.values().cloned().collect();
        aux.clear();
        taken
    }

    pub fn aux_ids(&self) -> Vec<u8> {
        self.aux.read().keys().cloned().collect()
    }

    /// Channel for `aux_id`. Missing or closed auxiliary channels resolve to the main one.
    pub fn select_connection(&self, aux_id: u8) -> Arc<Connection> {
        if aux_id != 0 {
            if let Some(conn) = self.aux.read().get(&aux_id) {
                if !conn.is_closed() {
                    return conn.clone();
                }
            }
            debug!("{}: aux {} unavailable, using main connection", self.dpid, aux_id);
        }
        self.main.clone()
    }

    pub(crate) fn set_descriptor(&self, descriptor: DeviceDescriptor) {
        *self.descriptor.write() = Some(descriptor);
    }

    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.descriptor.read().clone()
    }

    pub(crate) fn set_device_type(&self, device_type: String) {
        *self.device_type.write() = Some(device_type);
    }

    pub fn device_type(&self) -> Option<String> {
        self.device_type.read().clone()
    }

    pub(crate) fn set_no_table_features(&self) {
        self.no_table_features.store(true, Ordering::Release);
    }

    /// Returns true only for the call that flipped the flag.
    pub(crate) fn mark_announced(&self) -> bool {
        !self.announced.swap(true, Ordering::AcqRel)
    }

    pub fn is_announced(&self) -> bool {
        self.announced.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) -> bool {
        !self.ready.swap(true, Ordering::AcqRel)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_pipeline(&self, handle: PostHandshakeHandle) {
        *self.pipeline.lock() = Some(handle);
    }

    /// Finish the post-handshake task: mark the datapath ready and run `announce`, unless the
    /// task was cancelled or the main connection closed. Runs under the lock `cancel_pipeline`
    /// takes, so a teardown either suppresses the announcement or is ordered after it.
    pub(crate) fn complete_pipeline<F: FnOnce()>(&self, announce: F) -> bool {
        let pipeline = self.pipeline.lock();
        let live = match *pipeline {
            Some(ref handle) => !handle.is_cancelled(),
            None => false,
        };
        if !live || self.main.is_closed() {
            return false;
        }
        if self.mark_ready() {
            announce();
        }
        true
    }

    /// Cancel the post-handshake task, if one is still tracked.
    pub(crate) fn cancel_pipeline(&self) {
        if let Some(handle) = self.pipeline.lock().take() {
            handle.cancel();
        }
    }

    pub fn info(&self) -> DatapathInfo {
        DatapathInfo {
            dpid: self.dpid,
            version: self.version(),
            remote_address: self.main.remote().to_string(),
            num_buffers: self.features.num_buffers,
            num_tables: self.features.num_tables,
            capabilities: self.features.capabilities,
            descriptor: self.descriptor(),
            device_type: self.device_type(),
            ports: self.ports.snapshot(),
            auxiliary_ids: self.aux_ids(),
            supports_table_features: !self.no_table_features.load(Ordering::Acquire),
            ready: self.is_ready(),
            connected_at: self.connected_at,
            idle_for: Instant::now().saturating_duration_since(self.main.last_seen()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ofp_serialization::OfpCodec;

    fn features(dpid: u64) -> SwitchFeatures {
        SwitchFeatures {
            datapath_id: dpid,
            num_buffers: 256,
            num_tables: 4,
            auxiliary_id: 0,
            capabilities: 0,
            actions: 0,
            ports: vec![Port::new(1, "eth1")],
        }
    }

    fn connection(aux_id: u8) -> Arc<Connection> {
        let (conn, _rx) = Connection::new(format!("aux{}", aux_id), Arc::new(OfpCodec::new()), 8);
        conn.bind(DatapathId(7), aux_id);
        conn
    }

    #[test]
    fn test_dpid_display() {
        assert_eq!(DatapathId(0x0011_2233_4455_6677).to_string(), "00:11:22:33:44:55:66:77");
    }

    #[test]
    fn test_aux_fallback_to_main() {
        let main = connection(0);
        let dp = Datapath::new(features(7), main.clone(), Duration::from_secs(1));
        let aux1 = connection(1);
        dp.attach_aux(aux1.clone());

        assert!(Arc::ptr_eq(&dp.select_connection(1), &aux1));
        assert!(Arc::ptr_eq(&dp.select_connection(0), &main));
        // never another aux channel
        assert!(Arc::ptr_eq(&dp.select_connection(2), &main));

        aux1.close();
        assert!(Arc::ptr_eq(&dp.select_connection(1), &main));
        assert!(dp.detach_aux(&aux1));
        assert!(dp.aux_ids().is_empty());
    }

    #[test]
    fn test_detach_replaced_aux_is_noop() {
        let dp = Datapath::new(features(7), connection(0), Duration::from_secs(1));
        let old = connection(1);
        let new = connection(1);
        dp.attach_aux(old.clone());
        dp.attach_aux(new.clone());
        assert!(!dp.detach_aux(&old));
        assert_eq!(dp.aux_ids(), vec![1]);
    }

    #[test]
    fn test_announce_once() {
        let dp = Datapath::new(features(7), connection(0), Duration::from_secs(1));
        assert!(dp.mark_announced());
        assert!(!dp.mark_announced());
        let info = dp.info();
        assert_eq!(info.dpid, DatapathId(7));
        assert_eq!(info.ports.len(), 1);
        assert!(!info.ready);
        assert!(info.supports_table_features);
    }
}
