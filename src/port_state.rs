use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::message::{Port, PortReason, PortStatus};

/// Per-datapath port table, rebuilt from each handshake and kept current by port-status events.
#[derive(Debug, Default)]
pub struct PortStateCache {
    ports: RwLock<BTreeMap<u32, Port>>,
}

impl PortStateCache {
    pub fn new() -> PortStateCache {
        PortStateCache::default()
    }

    pub fn replace_all(&self, ports: Vec<Port>) {
        let mut table = self.ports.write();
        table.clear();
        for port in ports {
            table.insert(port.port_no, port);
        }
    }

    /// Apply a port-status change. Returns the previous state of the port, if it was known.
    pub fn apply(&self, status: &PortStatus) -> Option<Port> {
        let mut table = self.ports.write();
        match status.reason {
            PortReason::Delete => table.remove(&status.desc.port_no),
            PortReason::Add | PortReason::Modify => {
                table.insert(status.desc.port_no, status.desc.clone())
            }
        }
    }

    pub fn get(&self, port_no: u32) -> Option<Port> {
        self.ports.read().get(&port_no).cloned()
    }

    /// Ports ordered by port number.
    pub fn snapshot(&self) -> Vec<Port> {
        self.ports.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.read().is_empty()
    }
}
