#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use rust_ofp_ctl::message::{FlowMod, FlowModCommand, Message};
use rust_ofp_ctl::post_handshake::InitialFlowContributor;
use rust_ofp_ctl::testing::{CompliantBehavior, EventRecorder, MockSwitch, SwitchProfile};
use rust_ofp_ctl::{
    AlwaysMaster, Controller, ControllerConfig, ControllerService, DatapathId, DatapathInfo, MessageEvent,
    MessageListener, PacketSequencer, RoleAdvisor,
};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn config() -> ControllerConfig {
    ControllerConfig::default()
        .with_listen_addresses(vec![])
        .with_worker_count(2)
        .with_barrier_timeout(Duration::from_secs(5))
}

pub fn controller_with(config: ControllerConfig, advisor: Arc<dyn RoleAdvisor>) -> (Controller, Arc<EventRecorder>) {
    let controller = Controller::new(config, advisor);
    let recorder = Arc::new(EventRecorder::new());
    controller.add_datapath_listener(recorder.clone(), 0);
    (controller, recorder)
}

pub fn controller() -> (Controller, Arc<EventRecorder>) {
    controller_with(config(), Arc::new(AlwaysMaster))
}

pub fn connect(controller: &Controller, dpid: u64, version: u8) -> MockSwitch<CompliantBehavior> {
    MockSwitch::connect(controller, SwitchProfile::new(dpid, version), CompliantBehavior::default())
        .expect("mock switch connects")
}

pub fn flow(priority: u16) -> FlowMod {
    FlowMod {
        priority,
        table_id: 0,
        ..FlowMod::new(FlowModCommand::Add)
    }
}

pub struct Flows(pub Vec<FlowMod>);

impl InitialFlowContributor for Flows {
    fn name(&self) -> &str {
        "fixed flows"
    }

    fn provide_initial_flows(&self, _info: &DatapathInfo, _hybrid_mode: bool) -> Vec<FlowMod> {
        self.0.clone()
    }
}

pub struct NeverMaster;

impl RoleAdvisor for NeverMaster {
    fn is_master_for(&self, _dpid: DatapathId) -> bool {
        false
    }
}

/// Records every message it is handed, as a listener or as the sequencer.
#[derive(Default)]
pub struct Collector {
    pub seen: Mutex<Vec<Message>>,
}

impl Collector {
    pub fn count_where<F: Fn(&Message) -> bool>(&self, f: F) -> usize {
        self.seen.lock().iter().filter(|m| f(m)).count()
    }

    pub async fn wait_where<F: Fn(&Message) -> bool>(&self, f: F, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.count_where(&f) > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

impl MessageListener for Collector {
    fn on_message(&self, event: &MessageEvent) -> Result<(), failure::Error> {
        self.seen.lock().push(event.message.clone());
        Ok(())
    }
}

impl PacketSequencer for Collector {
    fn on_packet_in(&self, event: &MessageEvent) -> Result<(), failure::Error> {
        self.seen.lock().push(event.message.clone());
        Ok(())
    }
}

/// Poll `f` until it holds or `timeout` passes.
pub async fn eventually<F: Fn() -> bool>(f: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    f()
}

pub fn datapath_count(controller: &Controller) -> usize {
    controller.all_datapath_info().len()
}
